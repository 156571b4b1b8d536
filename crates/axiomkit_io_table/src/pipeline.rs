//! Parallel record mapping in front of the sequential emitter, and one-call
//! export helpers.
//!
//! Records are mapped in chunks on a rayon pool by a producer thread; mapped
//! chunks travel through a bounded channel of `queue_depth` chunks and are
//! appended by the calling thread in their original order.

use std::path::Path;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;

use polars::prelude::DataFrame;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::emitter::{SpecEmitOutcome, StreamingRowEmitter};
use crate::feed::{derive_header_record, derive_record_from_row};
use crate::grid::build_grid_tables;
use crate::html::parse_html_tables;
use crate::sink::{SheetSink, XlsxSheetSink};
use crate::spec::{
    Result, SpecColumnValue, SpecEmitOptions, SpecGridBuildOptions, SpecRawTable,
    TableExportError,
};
use crate::style::StyleCascade;
use crate::util::calculate_worker_limit;

type MappedChunk = Result<Vec<Vec<SpecColumnValue>>>;

/// Map `records` in parallel and append them, in order, to the open sheet.
///
/// Returns the number of records appended. The first mapping or writing
/// failure stops both sides and is returned.
pub fn emit_records_parallel<S, R, F>(
    emitter: &mut StreamingRowEmitter<S>,
    records: &[R],
    map_record: F,
    num_workers_max: Option<usize>,
) -> Result<usize>
where
    S: SheetSink,
    R: Sync,
    F: Fn(&R) -> Result<Vec<SpecColumnValue>> + Sync,
{
    let n_records_chunk = emitter.options().n_records_chunk.max(1);
    let n_queue_depth = emitter.options().queue_depth.max(1);
    let n_workers_max = calculate_worker_limit(num_workers_max);
    let (tx, rx) = sync_channel::<MappedChunk>(n_queue_depth);

    thread::scope(|scope| -> Result<usize> {
        let map_record = &map_record;
        let handle_producer = scope.spawn(move || {
            produce_chunks(records, map_record, n_records_chunk, n_workers_max, tx)
        });

        let res_consumed = consume_chunks(emitter, rx);
        let n_chunks_sent = handle_producer
            .join()
            .map_err(|_| TableExportError::InvalidState("record producer panicked".to_string()))?;
        let n_appended = res_consumed?;
        log::debug!("Pipeline appended {n_appended} records from {n_chunks_sent} chunks");
        Ok(n_appended)
    })
}

fn produce_chunks<R, F>(
    records: &[R],
    map_record: &F,
    n_records_chunk: usize,
    n_workers_max: usize,
    tx: SyncSender<MappedChunk>,
) -> usize
where
    R: Sync,
    F: Fn(&R) -> Result<Vec<SpecColumnValue>> + Sync,
{
    let map_chunk_serial =
        |chunk: &[R]| -> MappedChunk { chunk.iter().map(map_record).collect() };

    let thread_pool = if n_workers_max > 1 {
        match ThreadPoolBuilder::new().num_threads(n_workers_max).build() {
            Ok(thread_pool) => Some(thread_pool),
            Err(err) => {
                log::warn!(
                    "Failed to initialize thread pool (workers={n_workers_max}); fallback to serial record mapping ({err})."
                );
                None
            }
        }
    } else {
        None
    };

    let mut n_chunks_sent = 0usize;
    for chunk in records.chunks(n_records_chunk) {
        let mapped = match &thread_pool {
            Some(thread_pool) => {
                thread_pool.install(|| chunk.par_iter().map(map_record).collect::<MappedChunk>())
            }
            None => map_chunk_serial(chunk),
        };
        let if_failed = mapped.is_err();
        // The consumer hung up after a failure of its own.
        if tx.send(mapped).is_err() {
            break;
        }
        n_chunks_sent += 1;
        if if_failed {
            break;
        }
    }
    n_chunks_sent
}

fn consume_chunks<S: SheetSink>(
    emitter: &mut StreamingRowEmitter<S>,
    rx: Receiver<MappedChunk>,
) -> Result<usize> {
    let mut n_appended = 0usize;
    for mapped in rx {
        for record in mapped? {
            emitter.append_record(&record)?;
            n_appended += 1;
        }
    }
    Ok(n_appended)
}

/// Build grids for `tables` and write each as one sheet of `path_file_out`.
pub fn export_tables_to_xlsx(
    tables: &[SpecRawTable],
    path_file_out: impl AsRef<Path>,
    options: &SpecEmitOptions,
    grid_options: &SpecGridBuildOptions,
) -> Result<SpecEmitOutcome<XlsxSheetSink>> {
    let cascade = StyleCascade::new();
    let l_grids = build_grid_tables(tables, &cascade, grid_options)?;
    log::debug!("Style cascade after grid build: {:?}", cascade.stats());

    let sink = XlsxSheetSink::new(path_file_out.as_ref(), options.rule_memory);
    let mut emitter = StreamingRowEmitter::new(sink, options.clone())?;
    for grid in &l_grids {
        emitter.emit_table(grid, None)?;
    }
    emitter.finish()
}

/// Parse every table in `html` and export them to `path_file_out`.
pub fn export_html_to_xlsx(
    html: &str,
    path_file_out: impl AsRef<Path>,
    options: &SpecEmitOptions,
    grid_options: &SpecGridBuildOptions,
) -> Result<SpecEmitOutcome<XlsxSheetSink>> {
    let l_tables = parse_html_tables(html);
    if l_tables.is_empty() {
        log::warn!("No <table> found in HTML input; writing an empty workbook.");
    }
    export_tables_to_xlsx(&l_tables, path_file_out, options, grid_options)
}

/// Stream `df` (header record first) into one sheet of `path_file_out`.
///
/// Widths are caller-supplied `(column, width)` pairs; rows past the sheet row
/// cap continue on suffixed sheets.
pub fn export_dataframe_to_xlsx(
    df: &DataFrame,
    sheet_name: &str,
    path_file_out: impl AsRef<Path>,
    widths: &[(usize, f64)],
    options: &SpecEmitOptions,
    num_workers_max: Option<usize>,
) -> Result<SpecEmitOutcome<XlsxSheetSink>> {
    let sink = XlsxSheetSink::new(path_file_out.as_ref(), options.rule_memory);
    let mut emitter = StreamingRowEmitter::new(sink, options.clone())?;
    emitter.start_sheet(sheet_name, widths)?;
    emitter.append_record(&derive_header_record(df))?;

    let l_rows: Vec<usize> = (0..df.height()).collect();
    emit_records_parallel(
        &mut emitter,
        &l_rows,
        |&n_idx_row| derive_record_from_row(df, n_idx_row),
        num_workers_max,
    )?;
    emitter.end_sheet()?;
    emitter.finish()
}
