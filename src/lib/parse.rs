//! Line-oriented `KEY=VALUE` parsing.
//!
//! The parser keeps comments and blank lines as entries so a file can be
//! inspected or re-rendered, and follows the usual dotenv conventions:
//!
//! - `# comment` lines and trailing ` # comment`s on unquoted values (a `#`
//!   with no whitespace before it, as in `a#b`, is part of the value)
//! - an optional leading `export `
//! - `'single'` and `` `back` `` quoted values taken literally
//! - `"double"` quoted values with `\n`, `\r`, `\t`, `\"` and `\\` escapes
//! - quoted values spanning several lines, e.g. PEM keys
//!
//! When a key is assigned more than once the last assignment wins.

use std::{borrow::Cow, collections::BTreeMap, convert::TryFrom, fmt};

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

const COMMENT_PREFIX: &str = "#";
const ASSIGNMENT_OPERATOR: &str = "=";
const EXPORT_PREFIX: &str = "export ";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvFile<'a> {
  pub entries: Vec<EnvEntry<'a>>,
}

impl<'a> fmt::Display for EnvFile<'a> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for entry in &self.entries {
      write!(f, "{}", entry)?;
    }
    Ok(())
  }
}

impl<'a> TryFrom<&'a str> for EnvFile<'a> {
  type Error = ParseError;

  fn try_from(s: &'a str) -> Result<Self, Self::Error> {
    #[cfg(feature = "tracing")]
    debug!("Parsing env file with {} lines", s.lines().count());

    let spans = line_spans(s);
    let mut entries = Vec::new();
    let mut pending_comments = Vec::new();
    let mut index = 0;

    while index < spans.len() {
      let (start, end) = spans[index];
      let line = index + 1;

      #[cfg(feature = "tracing")]
      trace!("Parsing line {}: {:?}", line, &s[start..end]);

      // A quoted value may run over several lines, so an unterminated
      // quote keeps pulling in lines until it closes or the file ends.
      let mut last = index;
      let mut parsed = EnvEntry::parse(&s[start..end], line);
      while matches!(parsed, Err(ParseError::UnterminatedQuote { .. }))
        && last + 1 < spans.len()
      {
        last += 1;
        parsed = EnvEntry::parse(&s[start..spans[last].1], line);
      }
      index = last + 1;

      let mut entry = parsed?;

      if let EnvEntry::Variable(ref mut var) = entry {
        var.preceding_comments = std::mem::take(&mut pending_comments);
      } else if let EnvEntry::OrphanComment(comment) = entry {
        pending_comments.push(comment);
        continue;
      } else if matches!(entry, EnvEntry::EmptyLine) && !pending_comments.is_empty() {
        for comment in pending_comments.drain(..) {
          entries.push(EnvEntry::OrphanComment(comment));
        }
      }

      entries.push(entry);
    }

    for comment in pending_comments {
      entries.push(EnvEntry::OrphanComment(comment));
    }

    #[cfg(feature = "tracing")]
    debug!("Parsed {} entries", entries.len());

    Ok(Self { entries })
  }
}

impl<'a> EnvFile<'a> {
  /// Returns the effective assignment of `key`, i.e. the last one in the file.
  pub fn get(&self, key: &str) -> Option<&EnvVariable<'a>> {
    self.variables().filter(|var| var.key == key).last()
  }

  pub fn variables(&self) -> impl Iterator<Item = &EnvVariable<'a>> {
    self.entries.iter().filter_map(|entry| match entry {
      EnvEntry::Variable(var) => Some(var),
      _ => None,
    })
  }

  /// Collapses the file into its effective key/value mapping.
  pub fn to_map(&self) -> BTreeMap<String, String> {
    self
      .variables()
      .map(|var| (var.key.to_string(), var.value.to_string()))
      .collect()
  }

  /// Renders a mapping as `KEY=VALUE` lines, sorted by key.
  ///
  /// Values that would not read back identically when unquoted are written
  /// double-quoted, so `EnvFile::try_from(render_map(m)).to_map() == m`.
  pub fn render_map(map: &BTreeMap<String, String>) -> String {
    let file = EnvFile {
      entries: map
        .iter()
        .map(|(key, value)| {
          EnvEntry::Variable(EnvVariable {
            key: Cow::Borrowed(key.as_str()),
            value: Cow::Borrowed(value.as_str()),
            exported: false,
            preceding_comments: Vec::new(),
            inline_comment: None,
          })
        })
        .collect(),
    };

    file.to_string()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvEntry<'a> {
  Variable(EnvVariable<'a>),
  OrphanComment(EnvComment<'a>),
  EmptyLine,
}

impl<'a> fmt::Display for EnvEntry<'a> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EnvEntry::Variable(var) => {
        write!(f, "{}", var)?;
        writeln!(f)
      }
      EnvEntry::OrphanComment(comment) => {
        writeln!(f, "{}", comment)
      }
      EnvEntry::EmptyLine => {
        writeln!(f)
      }
    }
  }
}

impl<'a> TryFrom<&'a str> for EnvEntry<'a> {
  type Error = ParseError;

  fn try_from(s: &'a str) -> Result<Self, Self::Error> {
    Self::parse(s, 1)
  }
}

impl<'a> EnvEntry<'a> {
  fn parse(s: &'a str, line: usize) -> Result<Self, ParseError> {
    let trimmed = s.trim();

    if trimmed.is_empty() {
      Ok(EnvEntry::EmptyLine)
    } else if trimmed.starts_with(COMMENT_PREFIX) {
      Ok(EnvEntry::OrphanComment(EnvComment::parse(trimmed, line)?))
    } else {
      Ok(EnvEntry::Variable(EnvVariable::parse(trimmed, line)?))
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvVariable<'a> {
  pub key: Cow<'a, str>,
  pub value: Cow<'a, str>,
  pub exported: bool,
  pub preceding_comments: Vec<EnvComment<'a>>,
  pub inline_comment: Option<EnvComment<'a>>,
}

impl<'a> fmt::Display for EnvVariable<'a> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for comment in &self.preceding_comments {
      writeln!(f, "{}", comment)?;
    }
    if self.exported {
      write!(f, "{}", EXPORT_PREFIX)?;
    }
    write!(f, "{}{}", self.key, ASSIGNMENT_OPERATOR)?;
    if needs_quotes(&self.value) {
      write!(f, "\"{}\"", escape(&self.value))?;
    } else {
      write!(f, "{}", self.value)?;
    }
    if let Some(comment) = &self.inline_comment {
      write!(f, " {}", comment)?;
    }
    Ok(())
  }
}

impl<'a> TryFrom<&'a str> for EnvVariable<'a> {
  type Error = ParseError;

  fn try_from(s: &'a str) -> Result<Self, Self::Error> {
    Self::parse(s.trim(), 1)
  }
}

impl<'a> EnvVariable<'a> {
  fn parse(s: &'a str, line: usize) -> Result<Self, ParseError> {
    #[cfg(feature = "tracing")]
    trace!("Parsing variable from: {:?}", s);

    let (exported, s) = match s.strip_prefix(EXPORT_PREFIX) {
      Some(rest) => (true, rest.trim_start()),
      None => (false, s),
    };

    let Some((key, value_part)) = s.split_once(ASSIGNMENT_OPERATOR) else {
      return Err(ParseError::InvalidLine {
        line,
        content: s.to_string(),
      });
    };

    let key = key.trim();
    if !is_valid_key(key) {
      return Err(ParseError::InvalidKey {
        line,
        key: key.to_string(),
      });
    }

    let (value, inline_comment) = parse_value(value_part, key, line)?;

    #[cfg(feature = "tracing")]
    trace!(
      "Parsed variable: key={}, has_inline_comment={}",
      key,
      inline_comment.is_some()
    );

    Ok(EnvVariable {
      key: Cow::Borrowed(key),
      value,
      exported,
      preceding_comments: Vec::new(),
      inline_comment,
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvComment<'a>(Cow<'a, str>);

impl<'a> fmt::Display for EnvComment<'a> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}{}", COMMENT_PREFIX, self.0)
  }
}

impl<'a> EnvComment<'a> {
  fn parse(s: &'a str, line: usize) -> Result<Self, ParseError> {
    let trimmed = s.trim();
    if let Some(content) = trimmed.strip_prefix(COMMENT_PREFIX) {
      Ok(EnvComment(Cow::Borrowed(content)))
    } else {
      Err(ParseError::InvalidLine {
        line,
        content: s.to_string(),
      })
    }
  }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
  #[error("line {line}: expected KEY=VALUE, found {content:?}")]
  InvalidLine { line: usize, content: String },
  #[error("line {line}: invalid variable name {key:?}")]
  InvalidKey { line: usize, key: String },
  #[error("line {line}: unterminated quoted value for {key}")]
  UnterminatedQuote { line: usize, key: String },
}

fn is_valid_key(key: &str) -> bool {
  !key.is_empty()
    && key
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn parse_value<'a>(
  raw: &'a str,
  key: &str,
  line: usize,
) -> Result<(Cow<'a, str>, Option<EnvComment<'a>>), ParseError> {
  let raw = raw.trim();

  let quote = match raw.chars().next() {
    Some(q @ ('"' | '\'' | '`')) => q,
    _ => {
      return Ok(match comment_start(raw) {
        Some(at) => (
          Cow::Borrowed(raw[..at].trim_end()),
          Some(EnvComment(Cow::Borrowed(&raw[at + COMMENT_PREFIX.len()..]))),
        ),
        None => (Cow::Borrowed(raw), None),
      });
    }
  };

  let body = &raw[1..];
  let Some(end) = closing_quote(body, quote) else {
    return Err(ParseError::UnterminatedQuote {
      line,
      key: key.to_string(),
    });
  };

  let inner = &body[..end];
  let rest = body[end + 1..].trim();

  let inline_comment = if rest.is_empty() {
    None
  } else if let Some(comment) = rest.strip_prefix(COMMENT_PREFIX) {
    Some(EnvComment(Cow::Borrowed(comment)))
  } else {
    return Err(ParseError::InvalidLine {
      line,
      content: raw.to_string(),
    });
  };

  let value = match (quote, inner.contains("\r\n")) {
    ('"', false) => unescape(inner),
    ('"', true) => Cow::Owned(unescape(&inner.replace("\r\n", "\n")).into_owned()),
    (_, false) => Cow::Borrowed(inner),
    (_, true) => Cow::Owned(inner.replace("\r\n", "\n")),
  };

  Ok((value, inline_comment))
}

/// Byte ranges of each line, without the line terminator.
fn line_spans(s: &str) -> Vec<(usize, usize)> {
  let mut spans = Vec::new();
  let mut start = 0;
  for line in s.split_inclusive('\n') {
    let content = line
      .strip_suffix('\n')
      .map_or(line, |l| l.strip_suffix('\r').unwrap_or(l));
    spans.push((start, start + content.len()));
    start += line.len();
  }
  spans
}

/// An unquoted value ends at a `#` that opens the value or follows whitespace.
fn comment_start(raw: &str) -> Option<usize> {
  let mut previous = None;
  for (index, c) in raw.char_indices() {
    if c == '#' && previous.is_none_or(char::is_whitespace) {
      return Some(index);
    }
    previous = Some(c);
  }
  None
}

fn closing_quote(body: &str, quote: char) -> Option<usize> {
  let mut escaped = false;
  for (index, c) in body.char_indices() {
    if escaped {
      escaped = false;
    } else if c == '\\' && quote == '"' {
      escaped = true;
    } else if c == quote {
      return Some(index);
    }
  }
  None
}

fn unescape(s: &str) -> Cow<'_, str> {
  if !s.contains('\\') {
    return Cow::Borrowed(s);
  }

  let mut out = String::with_capacity(s.len());
  let mut chars = s.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('n') => out.push('\n'),
      Some('r') => out.push('\r'),
      Some('t') => out.push('\t'),
      Some('"') => out.push('"'),
      Some('\\') => out.push('\\'),
      Some(other) => {
        out.push('\\');
        out.push(other);
      }
      None => out.push('\\'),
    }
  }
  Cow::Owned(out)
}

fn needs_quotes(value: &str) -> bool {
  value != value.trim()
    || value
      .chars()
      .any(|c| matches!(c, '#' | '"' | '\'' | '`' | '\\' | '\n' | '\r'))
}

fn escape(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  for c in value.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '"' => out.push_str("\\\""),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      _ => out.push(c),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_simple() {
    let input = "KEY=value\nANOTHER=test";
    let env: EnvFile = input.try_into().unwrap();

    assert_eq!(env.entries.len(), 2);
    match &env.entries[0] {
      EnvEntry::Variable(var) => {
        assert_eq!(var.key, "KEY");
        assert_eq!(var.value, "value");
      }
      _ => panic!("Expected variable"),
    }
    match &env.entries[1] {
      EnvEntry::Variable(var) => {
        assert_eq!(var.key, "ANOTHER");
        assert_eq!(var.value, "test");
      }
      _ => panic!("Expected variable"),
    }
  }

  #[test]
  fn test_parse_with_comments() {
    let input = "# This is a comment\nKEY=value\n# Another comment\n# Multi line\nTEST=123";
    let env: EnvFile = input.try_into().unwrap();

    let mut iter = env.entries.iter();

    match iter.next().unwrap() {
      EnvEntry::Variable(var) => {
        assert_eq!(var.key, "KEY");
        assert_eq!(var.preceding_comments.len(), 1);
        assert_eq!(var.preceding_comments[0].to_string(), "# This is a comment");
      }
      _ => panic!("Expected variable"),
    }

    match iter.next().unwrap() {
      EnvEntry::Variable(var) => {
        assert_eq!(var.key, "TEST");
        assert_eq!(var.value, "123");
        assert_eq!(var.preceding_comments.len(), 2);
      }
      _ => panic!("Expected variable"),
    }

    assert!(iter.next().is_none());
  }

  #[test]
  fn test_parse_inline_comments() {
    let input = "KEY=value # This is inline\nTEST=123";
    let env: EnvFile = input.try_into().unwrap();

    let var = env.get("KEY").unwrap();
    assert_eq!(var.value, "value");
    assert_eq!(
      var.inline_comment,
      Some(EnvComment(Cow::Owned(" This is inline".to_string())))
    );
  }

  #[test]
  fn test_quoted_values() {
    let input = concat!(
      "SINGLE='keep # this \\n literally'\n",
      "DOUBLE=\"line one\\nline \\\"two\\\"\" # trailing\n",
      "BACK=`a 'b' \"c\"`\n",
      "SPACED=\"  padded  \"\n",
    );
    let env: EnvFile = input.try_into().unwrap();

    assert_eq!(env.get("SINGLE").unwrap().value, "keep # this \\n literally");
    assert_eq!(env.get("DOUBLE").unwrap().value, "line one\nline \"two\"");
    assert!(env.get("DOUBLE").unwrap().inline_comment.is_some());
    assert_eq!(env.get("BACK").unwrap().value, "a 'b' \"c\"");
    assert_eq!(env.get("SPACED").unwrap().value, "  padded  ");
  }

  #[test]
  fn test_hash_inside_unquoted_value() {
    let input = "URL=http://x/a#frag\nB=abc #c\nC=#only comment\nD=a\t# tabbed";
    let env: EnvFile = input.try_into().unwrap();

    assert_eq!(env.get("URL").unwrap().value, "http://x/a#frag");
    assert!(env.get("URL").unwrap().inline_comment.is_none());
    assert_eq!(env.get("B").unwrap().value, "abc");
    assert_eq!(env.get("B").unwrap().inline_comment.as_ref().unwrap().to_string(), "#c");
    assert_eq!(env.get("C").unwrap().value, "");
    assert_eq!(env.get("D").unwrap().value, "a");
  }

  #[test]
  fn test_multiline_quoted_value() {
    let input = "A=1\nKEY=\"-----BEGIN\nabc\n-----END\"\nRAW='one\r\ntwo' # note\nB=2\n";
    let env: EnvFile = input.try_into().unwrap();

    let map = env.to_map();
    assert_eq!(map.len(), 4);
    assert_eq!(map["A"], "1");
    assert_eq!(map["KEY"], "-----BEGIN\nabc\n-----END");
    assert_eq!(map["RAW"], "one\ntwo");
    assert_eq!(map["B"], "2");
    assert!(env.get("RAW").unwrap().inline_comment.is_some());

    let rendered = EnvFile::render_map(&map);
    assert!(rendered.contains("KEY=\"-----BEGIN\\nabc\\n-----END\"\n"));
    let reparsed: EnvFile = rendered.as_str().try_into().unwrap();
    assert_eq!(reparsed.to_map(), map);
  }

  #[test]
  fn test_unterminated_multiline_value_reports_opening_line() {
    let err = EnvFile::try_from("A=1\nKEY=\"-----BEGIN\nabc\nB=2\n").unwrap_err();
    assert_eq!(
      err,
      ParseError::UnterminatedQuote {
        line: 2,
        key: "KEY".to_string()
      }
    );
  }

  #[test]
  fn test_export_prefix() {
    let env: EnvFile = "export API_KEY=abc".try_into().unwrap();
    let var = env.get("API_KEY").unwrap();
    assert!(var.exported);
    assert_eq!(var.value, "abc");
    assert_eq!(env.to_string(), "export API_KEY=abc\n");
  }

  #[test]
  fn test_last_assignment_wins() {
    let env: EnvFile = "KEY=first\nOTHER=x\nKEY=second".try_into().unwrap();
    assert_eq!(env.get("KEY").unwrap().value, "second");

    let map = env.to_map();
    assert_eq!(map.len(), 2);
    assert_eq!(map["KEY"], "second");
  }

  #[test]
  fn test_errors_carry_line_numbers() {
    let err = EnvFile::try_from("OK=1\nnot a variable").unwrap_err();
    assert_eq!(
      err,
      ParseError::InvalidLine {
        line: 2,
        content: "not a variable".to_string()
      }
    );

    let err = EnvFile::try_from("A=1\nB=2\nBAD KEY=3").unwrap_err();
    assert!(matches!(err, ParseError::InvalidKey { line: 3, .. }));

    let err = EnvFile::try_from("OPEN=\"never closed").unwrap_err();
    assert!(matches!(err, ParseError::UnterminatedQuote { line: 1, .. }));

    let err = EnvFile::try_from("JUNK='quoted' trailing").unwrap_err();
    assert!(matches!(err, ParseError::InvalidLine { line: 1, .. }));
  }

  #[test]
  fn test_roundtrip() {
    let input = "# Comment\nKEY=value\n\n# Orphan\nTEST=123 # inline";
    let env: EnvFile = input.try_into().unwrap();
    let output = env.to_string();

    let env2: EnvFile = output.as_str().try_into().unwrap();
    assert_eq!(env, env2);
  }

  #[test]
  fn test_render_map_quotes_when_needed() {
    let mut map = BTreeMap::new();
    map.insert("PLAIN".to_string(), "abc".to_string());
    map.insert("HASH".to_string(), "a#b".to_string());
    map.insert("MULTI".to_string(), "one\ntwo".to_string());
    map.insert("EMPTY".to_string(), String::new());
    map.insert("SLASH".to_string(), "C:\\path \"x\"".to_string());

    let rendered = EnvFile::render_map(&map);
    assert_eq!(
      rendered,
      concat!(
        "EMPTY=\n",
        "HASH=\"a#b\"\n",
        "MULTI=\"one\\ntwo\"\n",
        "PLAIN=abc\n",
        "SLASH=\"C:\\\\path \\\"x\\\"\"\n",
      )
    );

    let reparsed: EnvFile = rendered.as_str().try_into().unwrap();
    assert_eq!(reparsed.to_map(), map);
  }

  #[test]
  fn test_env_entry_from_str() {
    let entry: EnvEntry = "".try_into().unwrap();
    assert_eq!(entry, EnvEntry::EmptyLine);

    let entry: EnvEntry = "# This is a comment".try_into().unwrap();
    match entry {
      EnvEntry::OrphanComment(comment) => assert_eq!(
        comment,
        EnvComment(Cow::Owned(" This is a comment".to_string()))
      ),
      _ => panic!("Expected OrphanComment"),
    }

    let entry: EnvEntry = "KEY=".try_into().unwrap();
    match entry {
      EnvEntry::Variable(var) => {
        assert_eq!(var.key, "KEY");
        assert_eq!(var.value, "");
        assert!(var.inline_comment.is_none());
      }
      _ => panic!("Expected Variable"),
    }

    assert!(EnvEntry::try_from("invalid line without equals").is_err());
  }
}
