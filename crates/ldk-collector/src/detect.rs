//! File-type and encoding detection.
//!
//! Dispatch order per file: magic-number vs extension consistency, then
//! encoding detection for text sources, then a header sniff that picks the
//! parser. Each step fails soft — the caller records the file as FAILED with
//! the cause and moves on.

use anyhow::{bail, Result};

// ---------------------------------------------------------------------------
// File kind
// ---------------------------------------------------------------------------

/// Coarse file class established from extension + magic number.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileKind {
    Csv,
    Xlsx,
    /// JPEG / PNG / PDF capture routed to the OCR connector.
    InvoiceImage,
}

/// Detected text encoding of a statement export.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8Bom,
    Utf8,
    Gbk,
    Gb18030,
    Latin1,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextEncoding::Utf8Bom => "utf-8-bom",
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Gbk => "gbk",
            TextEncoding::Gb18030 => "gb18030",
            TextEncoding::Latin1 => "latin-1",
        }
    }
}

// ---------------------------------------------------------------------------
// Magic numbers
// ---------------------------------------------------------------------------

/// Establish the file kind, refusing extension/magic mismatches (a renamed
/// zip posing as `.csv` is an error, not a statement).
pub fn detect_kind(path_ext: &str, bytes: &[u8]) -> Result<FileKind> {
    let ext = path_ext.to_ascii_lowercase();
    let looks_zip = bytes.starts_with(b"PK\x03\x04");
    let looks_jpeg = bytes.starts_with(&[0xFF, 0xD8, 0xFF]);
    let looks_png = bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]);
    let looks_pdf = bytes.starts_with(b"%PDF");

    match ext.as_str() {
        "csv" | "txt" => {
            if looks_zip || looks_jpeg || looks_png || looks_pdf {
                bail!("extension .{ext} but binary magic number found");
            }
            Ok(FileKind::Csv)
        }
        "xlsx" => {
            if !looks_zip {
                bail!("extension .xlsx but no zip magic number");
            }
            Ok(FileKind::Xlsx)
        }
        "jpg" | "jpeg" => {
            if !looks_jpeg {
                bail!("extension .{ext} but no jpeg magic number");
            }
            Ok(FileKind::InvoiceImage)
        }
        "png" => {
            if !looks_png {
                bail!("extension .png but no png magic number");
            }
            Ok(FileKind::InvoiceImage)
        }
        "pdf" => {
            if !looks_pdf {
                bail!("extension .pdf but no pdf magic number");
            }
            Ok(FileKind::InvoiceImage)
        }
        other => bail!("unsupported extension: .{other}"),
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Decode statement bytes, trying UTF-8 (with/without BOM), then GBK, then
/// GB18030, then Latin-1 as the lossless fallback.
pub fn decode_text(bytes: &[u8]) -> (String, TextEncoding) {
    if let Some(stripped) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        if let Ok(s) = std::str::from_utf8(stripped) {
            return (s.to_string(), TextEncoding::Utf8Bom);
        }
    }
    if let Ok(s) = std::str::from_utf8(bytes) {
        return (s.to_string(), TextEncoding::Utf8);
    }

    let (decoded, _, had_errors) = encoding_rs::GBK.decode(bytes);
    if !had_errors {
        return (decoded.into_owned(), TextEncoding::Gbk);
    }

    let (decoded, _, had_errors) = encoding_rs::GB18030.decode(bytes);
    if !had_errors {
        return (decoded.into_owned(), TextEncoding::Gb18030);
    }

    let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    (decoded.into_owned(), TextEncoding::Latin1)
}

// ---------------------------------------------------------------------------
// Header sniff
// ---------------------------------------------------------------------------

/// Pick the statement parser from header content.
///
/// Alipay exports carry `业务流水号`, WeChat Pay exports carry `交易单号`;
/// anything else with amount+date columns is treated as a generic bank
/// export.
pub fn sniff_statement_parser(text: &str) -> Option<&'static str> {
    // Exports often carry preamble lines before the header; look at the
    // first few hundred lines at most.
    for line in text.lines().take(200) {
        if line.contains("业务流水号") {
            return Some("alipay");
        }
        if line.contains("交易单号") {
            return Some("wechat");
        }
    }

    let lower = text.to_lowercase();
    let has_amount = lower.contains("金额") || lower.contains("amount");
    let has_date = lower.contains("日期")
        || lower.contains("时间")
        || lower.contains("date")
        || lower.contains("time");
    if has_amount && has_date {
        Some("bank_csv")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_extension_with_zip_magic_refused() {
        let err = detect_kind("csv", b"PK\x03\x04rest").unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn xlsx_requires_zip_magic() {
        assert!(detect_kind("xlsx", b"PK\x03\x04rest").is_ok());
        assert!(detect_kind("xlsx", b"plain,text").is_err());
    }

    #[test]
    fn image_kinds() {
        assert_eq!(
            detect_kind("jpg", &[0xFF, 0xD8, 0xFF, 0xE0]).unwrap(),
            FileKind::InvoiceImage
        );
        assert_eq!(
            detect_kind("png", &[0x89, 0x50, 0x4E, 0x47, 0x0D]).unwrap(),
            FileKind::InvoiceImage
        );
        assert_eq!(
            detect_kind("pdf", b"%PDF-1.7").unwrap(),
            FileKind::InvoiceImage
        );
        assert!(detect_kind("jpg", b"notjpeg").is_err());
    }

    #[test]
    fn unsupported_extension_refused() {
        assert!(detect_kind("exe", b"MZ").is_err());
    }

    #[test]
    fn utf8_bom_detected_and_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("金额,日期".as_bytes());
        let (text, enc) = decode_text(&bytes);
        assert_eq!(enc, TextEncoding::Utf8Bom);
        assert_eq!(text, "金额,日期");
    }

    #[test]
    fn gbk_bytes_decoded() {
        let (encoded, _, _) = encoding_rs::GBK.encode("交易对方,金额");
        let (text, enc) = decode_text(&encoded);
        assert!(matches!(enc, TextEncoding::Gbk | TextEncoding::Gb18030));
        assert_eq!(text, "交易对方,金额");
    }

    #[test]
    fn arbitrary_bytes_fall_back_to_latin1() {
        let bytes = [0xFE, 0xFF, 0x80, 0x81];
        let (_, enc) = decode_text(&bytes);
        assert_eq!(enc, TextEncoding::Latin1);
    }

    #[test]
    fn sniff_alipay_wechat_bank() {
        assert_eq!(
            sniff_statement_parser("某些前言\n业务流水号,交易时间,金额\n"),
            Some("alipay")
        );
        assert_eq!(
            sniff_statement_parser("交易单号,交易时间,金额\n"),
            Some("wechat")
        );
        assert_eq!(
            sniff_statement_parser("date,payee,amount\n2026-01-02,X,1.00\n"),
            Some("bank_csv")
        );
        assert_eq!(sniff_statement_parser("random,words\n"), None);
    }
}
