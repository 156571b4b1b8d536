//! Overflow string cache: append-mostly string sequence with disk spillover.
//!
//! Entries are grouped in fixed-size pages. A page is written once to its own
//! segment file as soon as it is complete (or on [`OverflowStringCache::finish`]
//! for the trailing partial page) and afterwards is only ever read back. Up to
//! `n_pages_resident_max` spilled pages stay in memory under an LRU policy.
//!
//! Segment format: one line per slot, UTF-8, `\n` terminated. Backslash, LF
//! and CR are escaped; a slot that was never stored is written as `\x`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tempfile::TempDir;

use crate::conf::{C_SEGMENT_ABSENT_SLOT, CHR_SEGMENT_RECORD_SEP};
use crate::lru::PageLru;
use crate::spec::{Result, SpecOverflowCacheOptions, TableExportError};

type PageValues = Arc<Vec<Option<String>>>;

#[derive(Debug)]
struct PageBuffer {
    values: Vec<Option<String>>,
    n_filled: usize,
}

#[derive(Debug, Clone)]
struct SegmentRef {
    path: PathBuf,
    n_entries: usize,
}

#[derive(Debug)]
struct CacheInner {
    dict_pages_open: BTreeMap<usize, PageBuffer>,
    l_segments: Vec<Option<SegmentRef>>,
    lru_pages: PageLru<PageValues>,
    n_count_total: usize,
    n_count_expected: Option<usize>,
    if_finished: bool,
}

/// Bounded-memory string sequence addressed by 0-based index.
///
/// All window mutation happens under one lock, so a page is never evicted
/// while another thread is reading it.
#[derive(Debug)]
pub struct OverflowStringCache {
    dir_segments: TempDir,
    size_page: usize,
    n_pages_resident_max: usize,
    inner: Mutex<CacheInner>,
}

impl OverflowStringCache {
    /// Create an empty cache with its own segment directory.
    pub fn new(options: &SpecOverflowCacheOptions) -> Result<Self> {
        if options.size_page == 0 {
            return Err(TableExportError::InvalidOption(
                "size_page must be >= 1.".to_string(),
            ));
        }
        if options.n_pages_resident_max == 0 {
            return Err(TableExportError::InvalidOption(
                "n_pages_resident_max must be >= 1.".to_string(),
            ));
        }

        let path_dir_parent = options
            .dir_temp
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let dir_segments = tempfile::Builder::new()
            .prefix("axiomkit_spill_")
            .tempdir_in(&path_dir_parent)
            .map_err(|source| TableExportError::SegmentIo {
                path: path_dir_parent.clone(),
                source,
            })?;
        log::debug!(
            "Overflow cache created at {} (page={}, resident={})",
            dir_segments.path().display(),
            options.size_page,
            options.n_pages_resident_max
        );

        Ok(Self {
            dir_segments,
            size_page: options.size_page,
            n_pages_resident_max: options.n_pages_resident_max,
            inner: Mutex::new(CacheInner {
                dict_pages_open: BTreeMap::new(),
                l_segments: Vec::new(),
                lru_pages: PageLru::new(options.n_pages_resident_max),
                n_count_total: 0,
                n_count_expected: None,
                if_finished: false,
            }),
        })
    }

    /// Declare the expected entry count, if known, before the first `put`.
    ///
    /// Sizes the resident window to the number of pages actually needed and
    /// lets the trailing page spill as soon as it is complete.
    pub fn init(&self, n_count_total: Option<usize>) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.n_count_total > 0 || !inner.l_segments.is_empty() {
            return Err(TableExportError::InvalidState(
                "init() must be called before the first put().".to_string(),
            ));
        }
        inner.n_count_expected = n_count_total;
        let n_pages_resident = match n_count_total {
            Some(n_total) => n_total
                .div_ceil(self.size_page)
                .clamp(1, self.n_pages_resident_max),
            None => self.n_pages_resident_max,
        };
        inner.lru_pages = PageLru::new(n_pages_resident);
        Ok(())
    }

    /// Entries per page.
    pub fn size_page(&self) -> usize {
        self.size_page
    }

    /// Directory holding segment files.
    pub fn dir_segments(&self) -> &Path {
        self.dir_segments.path()
    }

    /// Number of distinct indices stored so far.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.n_count_total)
    }

    /// Nothing stored yet.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of segment files written.
    pub fn n_segments(&self) -> Result<usize> {
        Ok(self.lock()?.l_segments.iter().flatten().count())
    }

    /// Store `value` at `index`. Spills the owning page once it is complete.
    ///
    /// After `init(Some(total))`, indices at or past `total` are rejected with
    /// [`TableExportError::IndexOverflow`].
    pub fn put(&self, index: usize, value: impl Into<String>) -> Result<()> {
        let n_page = index / self.size_page;
        let n_slot = index % self.size_page;

        let mut guard = self.lock()?;
        let inner = &mut *guard;
        if inner.if_finished {
            return Err(TableExportError::CacheFinished);
        }
        if let Some(n_total) = inner.n_count_expected
            && index >= n_total
        {
            return Err(TableExportError::IndexOverflow(format!(
                "index {index} is past the declared total of {n_total} entries"
            )));
        }
        if matches!(inner.l_segments.get(n_page), Some(Some(_))) {
            return Err(TableExportError::SegmentImmutable { index });
        }

        let n_len_page = self.derive_page_len(n_page, inner.n_count_expected);
        let page = inner
            .dict_pages_open
            .entry(n_page)
            .or_insert_with(|| PageBuffer {
                values: vec![None; self.size_page],
                n_filled: 0,
            });
        if page.values[n_slot].is_none() {
            page.n_filled += 1;
            inner.n_count_total += 1;
        }
        page.values[n_slot] = Some(value.into());

        if page.n_filled >= n_len_page {
            let mut page = inner
                .dict_pages_open
                .remove(&n_page)
                .ok_or(TableExportError::PageNotFinalized { page: n_page })?;
            page.values.truncate(n_len_page);
            self.spill_page(inner, n_page, page.values)?;
        }
        Ok(())
    }

    /// Read back the entry at `index`.
    ///
    /// Errors with [`TableExportError::PageNotFinalized`] when the owning page
    /// was never written, and [`TableExportError::EntryMissing`] when the page
    /// exists but the slot was never stored.
    pub fn get(&self, index: usize) -> Result<String> {
        let n_page = index / self.size_page;
        let n_slot = index % self.size_page;

        let mut inner = self.lock()?;
        if let Some(page) = inner.dict_pages_open.get(&n_page) {
            return page.values[n_slot]
                .clone()
                .ok_or(TableExportError::EntryMissing { index });
        }
        if let Some(values) = inner.lru_pages.get(n_page) {
            return derive_slot_value(values, n_slot, index);
        }

        let Some(Some(segment)) = inner.l_segments.get(n_page).cloned() else {
            return Err(TableExportError::PageNotFinalized { page: n_page });
        };
        let values = Arc::new(read_segment(&segment)?);
        log::debug!("Overflow cache reloaded page {n_page} from {}", segment.path.display());
        let value = derive_slot_value(&values, n_slot, index);
        if let Some((n_page_evicted, _)) = inner.lru_pages.insert(n_page, values) {
            log::debug!("Overflow cache evicted page {n_page_evicted}");
        }
        value
    }

    /// Spill every partially filled page so that all entries become readable
    /// through segments, and release write buffers. Idempotent.
    pub fn finish(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.if_finished {
            return Ok(());
        }
        let dict_pages_open = std::mem::take(&mut inner.dict_pages_open);
        for (n_page, mut page) in dict_pages_open {
            if page.n_filled == 0 {
                continue;
            }
            let n_len = page
                .values
                .iter()
                .rposition(Option::is_some)
                .map_or(0, |n| n + 1);
            page.values.truncate(n_len);
            self.spill_page(&mut inner, n_page, page.values)?;
        }
        inner.if_finished = true;
        log::debug!(
            "Overflow cache finished: entries={} segments={}",
            inner.n_count_total,
            inner.l_segments.iter().flatten().count()
        );
        Ok(())
    }

    /// Delete every segment file and reset to empty. Idempotent.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.lock()?;
        let l_segments = std::mem::take(&mut inner.l_segments);
        inner.dict_pages_open.clear();
        inner.lru_pages.clear();
        inner.n_count_total = 0;
        inner.n_count_expected = None;
        inner.if_finished = false;
        drop(inner);

        for segment in l_segments.into_iter().flatten() {
            match fs::remove_file(&segment.path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(TableExportError::SegmentIo {
                        path: segment.path,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn is_page_resident(&self, n_page: usize) -> bool {
        self.lock()
            .map(|inner| inner.lru_pages.contains(n_page))
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheInner>> {
        self.inner
            .lock()
            .map_err(|_| TableExportError::LockPoisoned("overflow cache"))
    }

    fn derive_page_len(&self, n_page: usize, n_count_expected: Option<usize>) -> usize {
        match n_count_expected {
            Some(n_total) if n_total > n_page * self.size_page => {
                usize::min(self.size_page, n_total - n_page * self.size_page)
            }
            _ => self.size_page,
        }
    }

    fn spill_page(
        &self,
        inner: &mut CacheInner,
        n_page: usize,
        values: Vec<Option<String>>,
    ) -> Result<()> {
        let path = self
            .dir_segments
            .path()
            .join(format!("segment_{n_page:08}.txt"));
        write_segment(&path, &values)?;

        if inner.l_segments.len() <= n_page {
            inner.l_segments.resize(n_page + 1, None);
        }
        inner.l_segments[n_page] = Some(SegmentRef {
            path,
            n_entries: values.len(),
        });
        log::debug!("Overflow cache spilled page {n_page} ({} entries)", values.len());

        if let Some((n_page_evicted, _)) = inner.lru_pages.insert(n_page, Arc::new(values)) {
            log::debug!("Overflow cache evicted page {n_page_evicted}");
        }
        Ok(())
    }
}

impl Drop for OverflowStringCache {
    fn drop(&mut self) {
        if let Err(err) = self.clear() {
            log::warn!("Failed to clear overflow cache segments: {err}");
        }
    }
}

fn derive_slot_value(values: &[Option<String>], n_slot: usize, index: usize) -> Result<String> {
    values
        .get(n_slot)
        .cloned()
        .flatten()
        .ok_or(TableExportError::EntryMissing { index })
}

fn write_segment(path: &Path, values: &[Option<String>]) -> Result<()> {
    let to_err = |source| TableExportError::SegmentIo {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(to_err)?;
    let mut writer = BufWriter::new(file);
    for value in values {
        let c_line = match value {
            Some(text) => encode_segment_line(text),
            None => C_SEGMENT_ABSENT_SLOT.to_string(),
        };
        writer.write_all(c_line.as_bytes()).map_err(to_err)?;
        write!(writer, "{CHR_SEGMENT_RECORD_SEP}").map_err(to_err)?;
    }
    writer.flush().map_err(to_err)?;
    Ok(())
}

fn read_segment(segment: &SegmentRef) -> Result<Vec<Option<String>>> {
    let c_content =
        fs::read_to_string(&segment.path).map_err(|source| TableExportError::SegmentIo {
            path: segment.path.clone(),
            source,
        })?;
    let l_lines: Vec<&str> = c_content
        .strip_suffix(CHR_SEGMENT_RECORD_SEP)
        .map(|c_body| c_body.split(CHR_SEGMENT_RECORD_SEP).collect())
        .unwrap_or_default();
    if l_lines.len() != segment.n_entries {
        return Err(TableExportError::SegmentCorrupt {
            path: segment.path.clone(),
            expected: segment.n_entries,
            found: l_lines.len(),
        });
    }
    Ok(l_lines
        .into_iter()
        .map(|c_line| {
            if c_line == C_SEGMENT_ABSENT_SLOT {
                None
            } else {
                Some(decode_segment_line(c_line))
            }
        })
        .collect())
}

/// Escape one value so it fits on a single segment line.
pub fn encode_segment_line(text: &str) -> String {
    let mut c_out = String::with_capacity(text.len());
    for chr in text.chars() {
        match chr {
            '\\' => c_out.push_str("\\\\"),
            '\n' => c_out.push_str("\\n"),
            '\r' => c_out.push_str("\\r"),
            _ => c_out.push(chr),
        }
    }
    c_out
}

/// Inverse of [`encode_segment_line`].
pub fn decode_segment_line(line: &str) -> String {
    let mut c_out = String::with_capacity(line.len());
    let mut iter_chars = line.chars();
    while let Some(chr) = iter_chars.next() {
        if chr != '\\' {
            c_out.push(chr);
            continue;
        }
        match iter_chars.next() {
            Some('n') => c_out.push('\n'),
            Some('r') => c_out.push('\r'),
            Some(other) => c_out.push(other),
            None => c_out.push('\\'),
        }
    }
    c_out
}
