//! HTML tables into raw table descriptors.
//!
//! Every `<table>` in the document (nested ones included) becomes one
//! [`SpecRawTable`]. Span attributes are kept verbatim; span resolution happens
//! later in the grid builder.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};

use crate::spec::{SpecRawCell, SpecRawRow, SpecRawTable, StyleMap};
use crate::style::parse_inline_style;

static TABLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("table").expect("BUG: hardcoded selector 'table' is statically valid")
});

/// Parse every table of `html`, in document order.
pub fn parse_html_tables(html: &str) -> Vec<SpecRawTable> {
    let document = Html::parse_document(html);
    let l_tables: Vec<SpecRawTable> = document
        .select(&TABLE_SELECTOR)
        .map(|table| parse_table_element(&table))
        .collect();
    log::debug!("Parsed {} HTML tables", l_tables.len());
    l_tables
}

/// Parse one `<table>` element.
pub fn parse_table_element(table: &ElementRef<'_>) -> SpecRawTable {
    let mut style = derive_element_style(table);
    if !style.contains_key("border")
        && let Some(c_border) = table.value().attr("border")
        && c_border.trim().parse::<u32>().is_ok_and(|n| n > 0)
    {
        style.insert("border".to_string(), format!("{}px solid", c_border.trim()));
    }

    let mut spec_table = SpecRawTable {
        name: derive_table_name(table),
        style,
        ..Default::default()
    };

    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "thead" | "tbody" | "tfoot" => {
                let n_group = spec_table.row_groups.len();
                spec_table.row_groups.push(derive_element_style(&child));
                for tr in child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|el| el.value().name() == "tr")
                {
                    spec_table.rows.push(parse_row_element(&tr).in_group(n_group));
                }
            }
            "tr" => spec_table.rows.push(parse_row_element(&child)),
            _ => {}
        }
    }
    spec_table
}

fn parse_row_element(tr: &ElementRef<'_>) -> SpecRawRow {
    let cells = tr
        .children()
        .filter_map(ElementRef::wrap)
        .filter_map(|el| {
            let is_header = match el.value().name() {
                "th" => true,
                "td" => false,
                _ => return None,
            };
            Some(SpecRawCell {
                is_header,
                row_span: el.value().attr("rowspan").unwrap_or_default().to_string(),
                col_span: el.value().attr("colspan").unwrap_or_default().to_string(),
                content: extract_cell_text(&el),
                style: derive_element_style(&el),
            })
        })
        .collect();

    SpecRawRow {
        cells,
        style: derive_element_style(tr),
        group: None,
    }
}

fn derive_table_name(table: &ElementRef<'_>) -> Option<String> {
    if let Some(c_id) = table.value().attr("id").map(str::trim)
        && !c_id.is_empty()
    {
        return Some(c_id.to_string());
    }
    table
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "caption")
        .map(|caption| normalize_whitespace(&caption.text().collect::<String>()))
        .filter(|c_caption| !c_caption.is_empty())
}

/// Inline `style` plus the legacy presentational attributes it does not set.
fn derive_element_style(el: &ElementRef<'_>) -> StyleMap {
    let mut style = el
        .value()
        .attr("style")
        .map(parse_inline_style)
        .unwrap_or_default();
    for (c_attr, c_prop) in [
        ("bgcolor", "background-color"),
        ("align", "text-align"),
        ("valign", "vertical-align"),
    ] {
        if let Some(c_value) = el.value().attr(c_attr).map(str::trim)
            && !c_value.is_empty()
        {
            style
                .entry(c_prop.to_string())
                .or_insert_with(|| c_value.to_string());
        }
    }
    style
}

/// Visible text of a cell; `<br>` breaks lines, nested tables are skipped.
fn extract_cell_text(cell: &ElementRef<'_>) -> String {
    let mut c_raw = String::new();
    collect_text(cell, &mut c_raw);
    c_raw
        .split('\n')
        .map(normalize_whitespace)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}

fn collect_text(el: &ElementRef<'_>, c_out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => c_out.push_str(&text.replace('\n', " ")),
            Node::Element(element) => match element.name() {
                "br" => c_out.push('\n'),
                "table" => {}
                _ => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        collect_text(&child_el, c_out);
                    }
                }
            },
            _ => {}
        }
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
