//! Style translation: resolved style maps into concrete cell formats.

use std::sync::Arc;

use ahash::AHashMap;

use crate::conf::{N_PT_PER_PX, derive_default_header_format, derive_default_text_format};
use crate::spec::{Result, SpecCellFormat, StyleMap, TableExportError};

/// Turns a resolved style map into the concrete format of the target sheet.
pub trait StyleTranslator: Send + Sync {
    /// Format for a cell carrying `style`.
    fn translate(&self, style: &StyleMap, is_header: bool) -> SpecCellFormat;
}

/// Translator for the CSS properties commonly found on HTML tables.
#[derive(Debug, Clone)]
pub struct CssStyleTranslator {
    fmt_text: SpecCellFormat,
    fmt_header: SpecCellFormat,
}

impl Default for CssStyleTranslator {
    fn default() -> Self {
        Self::new(derive_default_text_format(), derive_default_header_format())
    }
}

impl CssStyleTranslator {
    /// Translator overlaying CSS onto the given body/header base formats.
    pub fn new(fmt_text: SpecCellFormat, fmt_header: SpecCellFormat) -> Self {
        Self {
            fmt_text,
            fmt_header,
        }
    }
}

impl StyleTranslator for CssStyleTranslator {
    fn translate(&self, style: &StyleMap, is_header: bool) -> SpecCellFormat {
        let fmt_base = if is_header {
            &self.fmt_header
        } else {
            &self.fmt_text
        };
        fmt_base.with_(derive_format_patch(style))
    }
}

/// Format patch holding only what `style` sets. Unknown properties are ignored.
pub fn derive_format_patch(style: &StyleMap) -> SpecCellFormat {
    let mut fmt = SpecCellFormat::default();
    for (c_key, c_value) in style {
        let c_value = c_value.trim();
        match c_key.as_str() {
            "color" => fmt.font_color = parse_css_color(c_value),
            "background-color" | "background" => fmt.bg_color = parse_css_color(c_value),
            "font-weight" => fmt.bold = parse_font_weight(c_value),
            "font-style" => {
                fmt.italic = match c_value.to_ascii_lowercase().as_str() {
                    "italic" | "oblique" => Some(true),
                    "normal" => Some(false),
                    _ => None,
                }
            }
            "font-size" => fmt.font_size = parse_font_size(c_value),
            "font-family" => fmt.font_name = parse_font_family(c_value),
            "text-align" => fmt.align = parse_text_align(c_value),
            "vertical-align" => fmt.valign = parse_vertical_align(c_value),
            "text-decoration" | "text-decoration-line" => {
                if c_value.to_ascii_lowercase().contains("underline") {
                    fmt.underline = Some(true);
                } else if c_value.eq_ignore_ascii_case("none") {
                    fmt.underline = Some(false);
                }
            }
            "white-space" => {
                fmt.text_wrap = match c_value.to_ascii_lowercase().as_str() {
                    "nowrap" => Some(false),
                    "pre" | "pre-wrap" | "pre-line" | "normal" | "break-spaces" => Some(true),
                    _ => None,
                }
            }
            "border" => fmt.border = parse_border(c_value),
            "border-top" => fmt.top = parse_border(c_value),
            "border-bottom" => fmt.bottom = parse_border(c_value),
            "border-left" => fmt.left = parse_border(c_value),
            "border-right" => fmt.right = parse_border(c_value),
            // Excel HTML export convention.
            "mso-number-format" => {
                let c_fmt = c_value.trim_matches(|chr| chr == '"' || chr == '\'');
                if !c_fmt.is_empty() {
                    fmt.num_format = Some(c_fmt.replace("\\\\", "\\"));
                }
            }
            _ => {}
        }
    }
    fmt
}

////////////////////////////////////////////////////////////////////////////////
// #region CssValueParsing

const TUP_CSS_NAMED_COLORS: [(&str, &str); 19] = [
    ("black", "#000000"),
    ("white", "#FFFFFF"),
    ("red", "#FF0000"),
    ("green", "#008000"),
    ("blue", "#0000FF"),
    ("yellow", "#FFFF00"),
    ("gray", "#808080"),
    ("grey", "#808080"),
    ("silver", "#C0C0C0"),
    ("orange", "#FFA500"),
    ("purple", "#800080"),
    ("navy", "#000080"),
    ("maroon", "#800000"),
    ("teal", "#008080"),
    ("olive", "#808000"),
    ("lime", "#00FF00"),
    ("aqua", "#00FFFF"),
    ("cyan", "#00FFFF"),
    ("fuchsia", "#FF00FF"),
];

/// Parse a CSS color into `#RRGGBB`.
///
/// Supports `#rgb`, `#rrggbb`, `rgb(r, g, b)` and a small set of named colors.
pub fn parse_css_color(value: &str) -> Option<String> {
    let c_value = value.trim().to_ascii_lowercase();
    if let Some(c_hex) = c_value.strip_prefix('#') {
        if !c_hex.chars().all(|chr| chr.is_ascii_hexdigit()) {
            return None;
        }
        return match c_hex.len() {
            3 => Some(format!(
                "#{}",
                c_hex
                    .chars()
                    .flat_map(|chr| [chr, chr])
                    .collect::<String>()
                    .to_ascii_uppercase()
            )),
            6 => Some(format!("#{}", c_hex.to_ascii_uppercase())),
            _ => None,
        };
    }
    if let Some(c_args) = c_value
        .strip_prefix("rgb(")
        .and_then(|c_rest| c_rest.strip_suffix(')'))
    {
        let l_channels: Vec<u8> = c_args
            .split(',')
            .map(|c_part| c_part.trim().parse::<u8>())
            .collect::<std::result::Result<Vec<u8>, _>>()
            .ok()?;
        if let [n_r, n_g, n_b] = l_channels[..] {
            return Some(format!("#{n_r:02X}{n_g:02X}{n_b:02X}"));
        }
        return None;
    }
    TUP_CSS_NAMED_COLORS
        .iter()
        .find(|(c_name, _)| *c_name == c_value)
        .map(|(_, c_hex)| (*c_hex).to_string())
}

fn parse_font_weight(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "bold" | "bolder" => Some(true),
        "normal" | "lighter" => Some(false),
        c_other => c_other.parse::<u32>().ok().map(|n_weight| n_weight >= 600),
    }
}

/// Parse a CSS font size into whole points (`pt`, `px` or bare number).
pub fn parse_font_size(value: &str) -> Option<i64> {
    let c_value = value.trim().to_ascii_lowercase();
    let (c_num, n_factor) = if let Some(c_num) = c_value.strip_suffix("pt") {
        (c_num, 1.0)
    } else if let Some(c_num) = c_value.strip_suffix("px") {
        (c_num, N_PT_PER_PX)
    } else {
        (c_value.as_str(), 1.0)
    };
    let n_size = c_num.trim().parse::<f64>().ok()? * n_factor;
    if n_size.is_finite() && n_size > 0.0 {
        Some(n_size.round() as i64)
    } else {
        None
    }
}

fn parse_font_family(value: &str) -> Option<String> {
    let c_first = value
        .split(',')
        .next()?
        .trim()
        .trim_matches(|chr| chr == '"' || chr == '\'');
    if c_first.is_empty() {
        None
    } else {
        Some(c_first.to_string())
    }
}

fn parse_text_align(value: &str) -> Option<String> {
    match value.to_ascii_lowercase().as_str() {
        "left" | "start" => Some("left".to_string()),
        "right" | "end" => Some("right".to_string()),
        "center" => Some("center".to_string()),
        "justify" => Some("justify".to_string()),
        _ => None,
    }
}

fn parse_vertical_align(value: &str) -> Option<String> {
    match value.to_ascii_lowercase().as_str() {
        "top" | "text-top" => Some("top".to_string()),
        "middle" => Some("vcenter".to_string()),
        "bottom" | "text-bottom" => Some("bottom".to_string()),
        _ => None,
    }
}

/// Parse a CSS border shorthand into the xlsx border index.
///
/// `none`/`hidden` map to 0; solid lines map to thin/medium/thick by width.
pub fn parse_border(value: &str) -> Option<i64> {
    let c_value = value.to_ascii_lowercase();
    let l_tokens: Vec<&str> = c_value.split_whitespace().collect();
    if l_tokens.is_empty() {
        return None;
    }
    if l_tokens.iter().any(|c_tok| matches!(*c_tok, "none" | "hidden"))
        || l_tokens.iter().any(|c_tok| matches!(*c_tok, "0" | "0px" | "0pt"))
    {
        return Some(0);
    }

    let n_width_px = l_tokens
        .iter()
        .find_map(|c_tok| match *c_tok {
            "thin" => Some(1.0),
            "medium" => Some(2.0),
            "thick" => Some(3.0),
            _ => c_tok
                .strip_suffix("px")
                .and_then(|c_num| c_num.parse::<f64>().ok()),
        })
        .unwrap_or(1.0);

    let n_border = if l_tokens.contains(&"dashed") {
        if n_width_px >= 2.0 { 8 } else { 3 }
    } else if l_tokens.contains(&"dotted") {
        4
    } else if l_tokens.contains(&"double") {
        6
    } else if n_width_px >= 3.0 {
        5
    } else if n_width_px >= 2.0 {
        2
    } else {
        1
    };
    Some(n_border)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StyleRegistry

/// Per-workbook registry of concrete formats.
///
/// Each distinct `(is_header, resolved style)` is translated once; formats
/// equal by content share one id, so the id count is the number of style
/// objects the workbook will carry.
pub struct StyleRegistry {
    translator: Box<dyn StyleTranslator>,
    dict_id_by_style: AHashMap<(bool, Arc<StyleMap>), usize>,
    dict_id_by_format: AHashMap<SpecCellFormat, usize>,
    l_formats: Vec<SpecCellFormat>,
    n_styles_max: usize,
}

impl StyleRegistry {
    /// Registry using the CSS translator.
    pub fn new(n_styles_max: usize) -> Self {
        Self::with_translator(Box::new(CssStyleTranslator::default()), n_styles_max)
    }

    /// Registry using a custom translator.
    pub fn with_translator(translator: Box<dyn StyleTranslator>, n_styles_max: usize) -> Self {
        Self {
            translator,
            dict_id_by_style: AHashMap::new(),
            dict_id_by_format: AHashMap::new(),
            l_formats: Vec::new(),
            n_styles_max,
        }
    }

    /// Format id of `style`, translating and registering it on first sight.
    pub fn resolve(&mut self, style: &Arc<StyleMap>, is_header: bool) -> Result<usize> {
        let key = (is_header, Arc::clone(style));
        if let Some(&n_id) = self.dict_id_by_style.get(&key) {
            return Ok(n_id);
        }

        let fmt = self.translator.translate(style, is_header);
        let n_id = match self.dict_id_by_format.get(&fmt) {
            Some(&n_id) => n_id,
            None => {
                if self.l_formats.len() >= self.n_styles_max {
                    return Err(TableExportError::StyleLimitExceeded {
                        limit: self.n_styles_max,
                    });
                }
                let n_id = self.l_formats.len();
                self.l_formats.push(fmt.clone());
                self.dict_id_by_format.insert(fmt, n_id);
                n_id
            }
        };
        self.dict_id_by_style.insert(key, n_id);
        Ok(n_id)
    }

    /// Format registered under `id`.
    pub fn format(&self, id: usize) -> Option<&SpecCellFormat> {
        self.l_formats.get(id)
    }

    /// Distinct formats registered.
    pub fn len(&self) -> usize {
        self.l_formats.len()
    }

    /// No format registered yet.
    pub fn is_empty(&self) -> bool {
        self.l_formats.is_empty()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::style::derive_style_map;

    #[test]
    fn test_parse_css_color_forms() {
        assert_eq!(parse_css_color("#abc"), Some("#AABBCC".to_string()));
        assert_eq!(parse_css_color(" #1a2B3c "), Some("#1A2B3C".to_string()));
        assert_eq!(parse_css_color("rgb(255, 0, 16)"), Some("#FF0010".to_string()));
        assert_eq!(parse_css_color("Red"), Some("#FF0000".to_string()));
        assert_eq!(parse_css_color("#12"), None);
        assert_eq!(parse_css_color("rgb(300,0,0)"), None);
        assert_eq!(parse_css_color("transparent"), None);
    }

    #[test]
    fn test_parse_font_size_units() {
        assert_eq!(parse_font_size("12pt"), Some(12));
        assert_eq!(parse_font_size("16px"), Some(12));
        assert_eq!(parse_font_size("10"), Some(10));
        assert_eq!(parse_font_size("large"), None);
        assert_eq!(parse_font_size("-3pt"), None);
    }

    #[test]
    fn test_parse_border_shorthand() {
        assert_eq!(parse_border("1px solid black"), Some(1));
        assert_eq!(parse_border("2px solid #000"), Some(2));
        assert_eq!(parse_border("thick solid"), Some(5));
        assert_eq!(parse_border("1px dashed"), Some(3));
        assert_eq!(parse_border("dotted"), Some(4));
        assert_eq!(parse_border("3px double"), Some(6));
        assert_eq!(parse_border("none"), Some(0));
        assert_eq!(parse_border("0"), Some(0));
        assert_eq!(parse_border(""), None);
    }

    #[test]
    fn test_derive_format_patch_maps_known_properties_only() {
        let style = derive_style_map([
            ("color", "#f00"),
            ("background-color", "yellow"),
            ("font-weight", "700"),
            ("font-style", "italic"),
            ("font-family", "'Arial', sans-serif"),
            ("text-align", "end"),
            ("vertical-align", "middle"),
            ("text-decoration", "underline"),
            ("white-space", "nowrap"),
            ("border-bottom", "2px solid"),
            ("mso-number-format", "\"0.00\""),
            ("cursor", "pointer"),
        ]);
        let fmt = derive_format_patch(&style);
        assert_eq!(
            fmt,
            SpecCellFormat {
                font_name: Some("Arial".to_string()),
                bold: Some(true),
                italic: Some(true),
                underline: Some(true),
                align: Some("right".to_string()),
                valign: Some("vcenter".to_string()),
                text_wrap: Some(false),
                bottom: Some(2),
                num_format: Some("0.00".to_string()),
                bg_color: Some("#FFFF00".to_string()),
                font_color: Some("#FF0000".to_string()),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_translator_starts_headers_bold() {
        let translator = CssStyleTranslator::default();
        let style = StyleMap::new();
        assert_eq!(translator.translate(&style, true).bold, Some(true));
        assert_eq!(translator.translate(&style, false).bold, None);

        let style = derive_style_map([("font-weight", "normal")]);
        assert_eq!(translator.translate(&style, true).bold, Some(false));
    }

    #[test]
    fn test_registry_reuses_ids_by_style_and_by_format() {
        let mut registry = StyleRegistry::new(10);
        let style_red = Arc::new(derive_style_map([("color", "red")]));
        let style_red_hex = Arc::new(derive_style_map([("color", "#FF0000")]));
        let style_blue = Arc::new(derive_style_map([("color", "blue")]));

        let n_red = registry.resolve(&style_red, false).expect("resolve");
        assert_eq!(registry.resolve(&style_red, false).expect("resolve"), n_red);
        assert_eq!(registry.resolve(&style_red_hex, false).expect("resolve"), n_red);
        let n_blue = registry.resolve(&style_blue, false).expect("resolve");
        let n_red_header = registry.resolve(&style_red, true).expect("resolve");

        assert_ne!(n_red, n_blue);
        assert_ne!(n_red, n_red_header);
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.format(n_blue).and_then(|fmt| fmt.font_color.clone()),
            Some("#0000FF".to_string())
        );
    }

    #[test]
    fn test_registry_signals_style_limit() {
        let mut registry = StyleRegistry::new(2);
        for c_color in ["red", "blue"] {
            let style = Arc::new(derive_style_map([("color", c_color)]));
            registry.resolve(&style, false).expect("resolve");
        }
        let style = Arc::new(derive_style_map([("color", "green")]));
        assert!(matches!(
            registry.resolve(&style, false),
            Err(TableExportError::StyleLimitExceeded { limit: 2 })
        ));

        // Already known styles still resolve at the cap.
        let style = Arc::new(derive_style_map([("color", "red")]));
        assert!(registry.resolve(&style, false).is_ok());
    }

    struct UpperTranslator;

    impl StyleTranslator for UpperTranslator {
        fn translate(&self, style: &StyleMap, _is_header: bool) -> SpecCellFormat {
            SpecCellFormat {
                num_format: style.get("fmt").map(|c_fmt| c_fmt.to_uppercase()),
                ..Default::default()
            }
        }
    }

    #[test]
    fn test_registry_with_custom_translator() {
        let mut registry = StyleRegistry::with_translator(Box::new(UpperTranslator), 4);
        let style = Arc::new(derive_style_map([("fmt", "0.0e+0")]));
        let n_id = registry.resolve(&style, false).expect("resolve");
        assert_eq!(
            registry.format(n_id).and_then(|fmt| fmt.num_format.clone()),
            Some("0.0E+0".to_string())
        );
    }
}
