//! Textual protocol header parsing.
//!
//! The measurement header carries several text buffers in two dialects:
//!
//! - **XProtocol** (`Config`, `Dicom`, `Meas`): `<ParamLong."lFrequency">  { 34045070 }`
//! - **ASCCONV** (`MeasYaps`, and embedded in `Phoenix`):
//!   `sRXSPEC.alDwellTime[0] = 10000`
//!
//! Scanner software versions disagree on line endings and on the exact
//! ASCCONV delimiters. Parsing never fails on those differences; each one is
//! recorded as a [`ProtocolWarning`] and parsing continues on a best-effort
//! basis.

use std::collections::BTreeMap;
use std::fmt;

use super::header::HeaderBuffer;

/// Recoverable irregularities found while parsing header text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolWarning {
    /// Buffer mixes CRLF and LF line endings
    MixedLineEndings {
        /// Buffer name
        buffer: String,
    },
    /// `MeasYaps` has no `### ASCCONV BEGIN` marker; every assignment line was parsed
    MissingAscconvBegin {
        /// Buffer name
        buffer: String,
    },
    /// An ASCCONV block runs to the end of the buffer without an END marker
    MissingAscconvEnd {
        /// Buffer name
        buffer: String,
    },
    /// An XProtocol value block is missing its closing brace
    UnterminatedParam {
        /// Buffer name
        buffer: String,
        /// Parameter name
        name: String,
    },
}

impl fmt::Display for ProtocolWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MixedLineEndings { buffer } => {
                write!(f, "buffer '{buffer}' mixes CRLF and LF line endings")
            }
            Self::MissingAscconvBegin { buffer } => {
                write!(f, "buffer '{buffer}' has no ASCCONV BEGIN marker")
            }
            Self::MissingAscconvEnd { buffer } => {
                write!(f, "buffer '{buffer}' has an ASCCONV block without END marker")
            }
            Self::UnterminatedParam { buffer, name } => {
                write!(f, "buffer '{buffer}' parameter '{name}' is not closed")
            }
        }
    }
}

/// Parsed protocol header with key/value lookup
#[derive(Debug, Clone, Default)]
pub struct ProtocolHeader {
    buffers: Vec<HeaderBuffer>,
    yaps: BTreeMap<String, String>,
    xprot: BTreeMap<String, BTreeMap<String, String>>,
    warnings: Vec<ProtocolWarning>,
}

impl ProtocolHeader {
    /// Parse all buffers of a measurement header
    pub fn parse(buffers: Vec<HeaderBuffer>) -> Self {
        let mut header = Self::default();

        // Phoenix first so MeasYaps values take precedence.
        let mut order: Vec<&HeaderBuffer> = buffers.iter().collect();
        order.sort_by_key(|b| b.name == "MeasYaps");

        for buffer in order {
            let text = header.normalize_newlines(buffer);
            match buffer.name.as_str() {
                "MeasYaps" | "Phoenix" => header.parse_ascconv(&buffer.name, &text),
                _ => {}
            }
            if buffer.name != "MeasYaps" {
                header.parse_xprot(&buffer.name, &text);
            }
        }

        header.buffers = buffers;
        header
    }

    /// Raw text of a named buffer
    pub fn buffer(&self, name: &str) -> Option<&str> {
        self.buffers
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.text.as_str())
    }

    /// Names of all buffers in file order
    pub fn buffer_names(&self) -> impl Iterator<Item = &str> {
        self.buffers.iter().map(|b| b.name.as_str())
    }

    /// ASCCONV value, e.g. `yaps("sRXSPEC.alDwellTime[0]")`
    pub fn yaps(&self, key: &str) -> Option<&str> {
        self.yaps.get(key).map(String::as_str)
    }

    /// ASCCONV value parsed as a number
    pub fn yaps_f64(&self, key: &str) -> Option<f64> {
        self.yaps(key).and_then(parse_number)
    }

    /// XProtocol value from a named buffer, e.g. `xprot("Dicom", "lFrequency")`
    pub fn xprot(&self, buffer: &str, name: &str) -> Option<&str> {
        self.xprot
            .get(buffer)
            .and_then(|params| params.get(name))
            .map(String::as_str)
    }

    /// XProtocol value parsed as a number (first token for arrays)
    pub fn xprot_f64(&self, buffer: &str, name: &str) -> Option<f64> {
        self.xprot(buffer, name).and_then(parse_number)
    }

    /// Number of ASCCONV entries
    pub fn yaps_len(&self) -> usize {
        self.yaps.len()
    }

    /// Irregularities tolerated while parsing
    pub fn warnings(&self) -> &[ProtocolWarning] {
        &self.warnings
    }

    /// Scanner software version string (`Dicom.SoftwareVersions`)
    pub fn software_version(&self) -> Option<&str> {
        self.xprot("Dicom", "SoftwareVersions")
    }

    /// Protocol name as entered on the scanner console
    pub fn protocol_name(&self) -> Option<&str> {
        self.xprot("Config", "ProtocolName")
            .or_else(|| self.yaps("tProtocolName"))
    }

    /// Sequence file name, e.g. `%CustomerSeq%\xe_radial_Dixon`
    pub fn sequence_name(&self) -> Option<&str> {
        self.yaps("tSequenceFileName")
            .or_else(|| self.xprot("Config", "SequenceFileName"))
    }

    fn normalize_newlines(&mut self, buffer: &HeaderBuffer) -> String {
        let text = &buffer.text;
        let crlf = text.matches("\r\n").count();
        let lf = text.matches('\n').count();
        if crlf > 0 && lf > crlf {
            self.warnings.push(ProtocolWarning::MixedLineEndings {
                buffer: buffer.name.clone(),
            });
        }
        text.replace("\r\n", "\n").replace('\r', "\n")
    }

    fn parse_ascconv(&mut self, buffer: &str, text: &str) {
        let mut in_block = false;
        let mut saw_begin = false;

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("###") {
                let upper = trimmed.to_ascii_uppercase();
                if upper.contains("ASCCONV BEGIN") {
                    if in_block {
                        self.warnings.push(ProtocolWarning::MissingAscconvEnd {
                            buffer: buffer.to_string(),
                        });
                    }
                    in_block = true;
                    saw_begin = true;
                    continue;
                }
                if upper.contains("ASCCONV END") {
                    in_block = false;
                    continue;
                }
            }
            if in_block {
                self.insert_assignment(trimmed);
            }
        }

        if in_block {
            self.warnings.push(ProtocolWarning::MissingAscconvEnd {
                buffer: buffer.to_string(),
            });
        }

        if !saw_begin && buffer == "MeasYaps" {
            self.warnings.push(ProtocolWarning::MissingAscconvBegin {
                buffer: buffer.to_string(),
            });
            for line in text.lines() {
                self.insert_assignment(line.trim());
            }
        }
    }

    fn insert_assignment(&mut self, line: &str) {
        let line = strip_comment(line);
        let Some((key, value)) = line.split_once('=') else {
            return;
        };
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) || key.starts_with('<') {
            return;
        }
        let value = value.trim().trim_matches('"').trim();
        self.yaps.insert(key.to_string(), value.to_string());
    }

    fn parse_xprot(&mut self, buffer: &str, text: &str) {
        let mut rest = text;
        while let Some(start) = rest.find("<Param") {
            rest = &rest[start + "<Param".len()..];

            let Some(close) = rest.find('>') else { break };
            let tag = &rest[..close];
            rest = &rest[close + 1..];

            let Some(name) = tag
                .split_once('"')
                .and_then(|(_, tail)| tail.split_once('"'))
                .map(|(name, _)| name.to_string())
            else {
                continue;
            };
            let kind = tag.split('.').next().unwrap_or_default();
            if !matches!(kind, "Long" | "Double" | "String" | "Bool") || name.is_empty() {
                continue;
            }

            let body = rest.trim_start();
            if !body.starts_with('{') {
                continue;
            }
            let (inner, terminated) = brace_block(&body[1..]);
            if !terminated {
                self.warnings.push(ProtocolWarning::UnterminatedParam {
                    buffer: buffer.to_string(),
                    name: name.clone(),
                });
            }

            let value = clean_value(inner);
            if !value.is_empty() {
                self.xprot
                    .entry(buffer.to_string())
                    .or_default()
                    .insert(name, value);
            }
        }
    }
}

/// Contents of a `{ ... }` block up to the matching brace.
fn brace_block(text: &str) -> (&str, bool) {
    let mut depth = 1usize;
    let mut in_quotes = false;
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '{' if !in_quotes => depth += 1,
            '}' if !in_quotes => {
                depth -= 1;
                if depth == 0 {
                    return (&text[..i], true);
                }
            }
            _ => {}
        }
    }
    (text, false)
}

/// Drop `<Tag> argument` pairs and quotes, collapse whitespace.
fn clean_value(inner: &str) -> String {
    let tokens = tokenize(inner);
    let mut out: Vec<String> = Vec::new();
    let mut skip_next = false;
    for token in tokens {
        if skip_next {
            skip_next = false;
            continue;
        }
        if token.starts_with('<') && token.ends_with('>') {
            skip_next = true;
            continue;
        }
        if token.starts_with('{') || token.starts_with('}') {
            continue;
        }
        let unquoted = token.trim_matches('"');
        if !unquoted.is_empty() {
            out.push(unquoted.to_string());
        }
    }
    out.join(" ")
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in text.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Parse the first token of a header value as a number (decimal or `0x` hex).
pub fn parse_number(value: &str) -> Option<f64> {
    let token = value.split_whitespace().next()?.trim_matches('"');
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok().map(|v| v as f64);
    }
    token.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(name: &str, text: &str) -> HeaderBuffer {
        HeaderBuffer {
            name: name.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_parse_ascconv_block() {
        let text = "junk\n### ASCCONV BEGIN object=MrProtDataImpl@MrProtocolData version=41340006 ###\n\
                    sRXSPEC.alDwellTime[0]\t = 10000\n\
                    tProtocolName = \"\"xe_calibration\"\"  # comment\n\
                    ### ASCCONV END ###\n";
        let header = ProtocolHeader::parse(vec![buffer("MeasYaps", text)]);

        assert_eq!(header.yaps("sRXSPEC.alDwellTime[0]"), Some("10000"));
        assert_eq!(header.yaps("tProtocolName"), Some("xe_calibration"));
        assert_eq!(header.yaps_f64("sRXSPEC.alDwellTime[0]"), Some(10000.0));
        assert!(header.warnings().is_empty());
    }

    #[test]
    fn test_crlf_and_missing_end_are_tolerated() {
        let text = "### ASCCONV BEGIN ###\r\nlRepetitions = 3\r\nlContrasts = 2\nalTR[0] = 15000\n";
        let header = ProtocolHeader::parse(vec![buffer("MeasYaps", text)]);

        assert_eq!(header.yaps_f64("lRepetitions"), Some(3.0));
        assert_eq!(header.yaps_f64("alTR[0]"), Some(15000.0));
        assert!(header.warnings().contains(&ProtocolWarning::MixedLineEndings {
            buffer: "MeasYaps".to_string()
        }));
        assert!(header.warnings().contains(&ProtocolWarning::MissingAscconvEnd {
            buffer: "MeasYaps".to_string()
        }));
    }

    #[test]
    fn test_missing_begin_parses_whole_buffer() {
        let header = ProtocolHeader::parse(vec![buffer("MeasYaps", "lContrasts = 2\n")]);
        assert_eq!(header.yaps("lContrasts"), Some("2"));
        assert_eq!(
            header.warnings(),
            &[ProtocolWarning::MissingAscconvBegin {
                buffer: "MeasYaps".to_string()
            }]
        );
    }

    #[test]
    fn test_parse_xprotocol_values() {
        let text = r#"<XProtocol>
{
  <ParamLong."lFrequency">  { 34075405  }
  <ParamDouble."flMagneticFieldStrength">  { <Precision> 6  2.89362  }
  <ParamString."Manufacturer">  { "SIEMENS"  }
  <ParamLong."alDwellTime">  { 10000 20000 }
  <ParamString."Empty">  { }
}"#;
        let header = ProtocolHeader::parse(vec![buffer("Dicom", text)]);

        assert_eq!(header.xprot("Dicom", "lFrequency"), Some("34075405"));
        assert_eq!(header.xprot_f64("Dicom", "flMagneticFieldStrength"), Some(2.89362));
        assert_eq!(header.xprot("Dicom", "Manufacturer"), Some("SIEMENS"));
        assert_eq!(header.xprot("Dicom", "alDwellTime"), Some("10000 20000"));
        assert_eq!(header.xprot_f64("Dicom", "alDwellTime"), Some(10000.0));
        assert_eq!(header.xprot("Dicom", "Empty"), None);
        assert_eq!(header.xprot("Config", "lFrequency"), None);
    }

    #[test]
    fn test_unterminated_param_warns() {
        let header = ProtocolHeader::parse(vec![buffer("Config", "<ParamString.\"ProtocolName\"> { \"xe_dixon\"")]);
        assert_eq!(header.protocol_name(), Some("xe_dixon"));
        assert_eq!(header.warnings().len(), 1);
    }

    #[test]
    fn test_measyaps_overrides_phoenix() {
        let phoenix = "### ASCCONV BEGIN ###\nlContrasts = 1\nlAverages = 4\n### ASCCONV END ###";
        let yaps = "### ASCCONV BEGIN ###\nlContrasts = 2\n### ASCCONV END ###";
        let header = ProtocolHeader::parse(vec![buffer("MeasYaps", yaps), buffer("Phoenix", phoenix)]);

        assert_eq!(header.yaps("lContrasts"), Some("2"));
        assert_eq!(header.yaps("lAverages"), Some("4"));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x10"), Some(16.0));
        assert_eq!(parse_number("\"2.5\""), Some(2.5));
        assert_eq!(parse_number("12 13"), Some(12.0));
        assert_eq!(parse_number("abc"), None);
    }
}
