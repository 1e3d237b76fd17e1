// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! deb822 control data primitives.

Control data consists of *paragraphs* of colon-separated fields separated
by blank lines. See
<https://www.debian.org/doc/debian-policy/ch-controlfields.html>.
*/

use {
    crate::error::{Error, Result},
    std::io::{BufRead, Write},
};

/// A field in a control paragraph.
///
/// Multi-line values retain their embedded newlines; each continuation line
/// keeps its leading space so serialization reproduces the original layout.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ControlField {
    name: String,
    value: String,
}

impl ControlField {
    /// Construct an instance from a field name and value.
    pub fn new(name: impl ToString, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// The name of this field.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value, with its original formatting.
    pub fn value_str(&self) -> &str {
        &self.value
    }

    /// Iterate over whitespace-separated words in the value.
    pub fn iter_words(&self) -> impl Iterator<Item = &str> {
        self.value.split_ascii_whitespace()
    }

    /// Iterate over lines in the value, with leading whitespace stripped.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> {
        self.value.lines().map(|line| line.trim_start())
    }

    /// Write `Name: value\n` to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(b": ")?;
        writer.write_all(self.value.as_bytes())?;
        writer.write_all(b"\n")
    }
}

/// An ordered collection of control fields.
///
/// Field names are case insensitive on read and case preserving on set.
/// A paragraph holds at most one field of a given name.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct ControlParagraph {
    fields: Vec<ControlField>,
}

impl ControlParagraph {
    /// Whether the paragraph has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a field, replacing any existing field of the same name.
    pub fn set_field(&mut self, field: ControlField) {
        self.fields
            .retain(|f| !f.name.eq_ignore_ascii_case(&field.name));
        self.fields.push(field);
    }

    /// Obtain the field with the given name, if present.
    pub fn field(&self, name: &str) -> Option<&ControlField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Obtain the raw string value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value_str())
    }

    /// Obtain the named field's value parsed as a [u64].
    pub fn field_u64(&self, name: &str) -> Option<Result<u64>> {
        self.field_str(name).map(|v| {
            v.parse::<u64>()
                .map_err(|e| Error::MalformedControl(format!("field {}: {}", name, e)))
        })
    }

    /// Obtain the value of a required field.
    pub fn required_field_str(&self, name: &str) -> Result<&str> {
        self.field_str(name)
            .ok_or_else(|| Error::MalformedControl(format!("required field missing: {}", name)))
    }

    /// Iterate over fields in insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = &ControlField> {
        self.fields.iter()
    }

    /// Serialize the paragraph.
    ///
    /// A trailing newline terminates the final field, but no blank separator
    /// line is written.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for field in &self.fields {
            field.write(writer)?;
        }

        Ok(())
    }
}

/// Incremental control data parser.
///
/// Lines are fed in one at a time; completed paragraphs are emitted as blank
/// lines are encountered.
#[derive(Clone, Debug, Default)]
pub struct ControlFileParser {
    paragraph: ControlParagraph,
    field: Option<String>,
}

impl ControlFileParser {
    /// Write a line (without trailing newline) to the parser.
    ///
    /// Returns a paragraph if the line completed one.
    pub fn write_line(&mut self, line: &str) -> Result<Option<ControlParagraph>> {
        let is_empty_line = line.trim().is_empty();
        let is_continuation = line.starts_with(' ') || line.starts_with('\t');

        let current_field = self.field.take();

        if is_empty_line {
            if let Some(field) = current_field {
                self.flush_field(field)?;
            }

            return Ok(if self.paragraph.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.paragraph))
            });
        }

        match (current_field, is_continuation) {
            // A new unindented line starts the next field.
            (Some(field), false) => {
                self.flush_field(field)?;
                self.field = Some(line.to_string());
            }
            // A continuation line extends the pending field.
            (Some(field), true) => {
                self.field = Some(field + "\n" + line);
            }
            (None, _) => {
                self.field = Some(line.to_string());
            }
        }

        Ok(None)
    }

    /// Finish parsing, emitting any final unterminated paragraph.
    pub fn finish(mut self) -> Result<Option<ControlParagraph>> {
        if let Some(field) = self.field.take() {
            self.flush_field(field)?;
        }

        Ok(if self.paragraph.is_empty() {
            None
        } else {
            Some(self.paragraph)
        })
    }

    fn flush_field(&mut self, data: String) -> Result<()> {
        let (first, rest) = match data.find('\n') {
            Some(pos) => (&data[0..pos], Some(&data[pos..])),
            None => (data.as_str(), None),
        };

        let (name, value) = first.split_once(':').ok_or_else(|| {
            Error::MalformedControl(format!("line is missing a colon: {}", first))
        })?;

        let mut value = value.trim().to_string();
        if let Some(rest) = rest {
            value.push_str(rest);
        }

        self.paragraph.set_field(ControlField::new(name, value));

        Ok(())
    }
}

/// An iterator of [ControlParagraph] read from a [BufRead] source.
pub struct ControlParagraphReader<R: BufRead> {
    reader: R,
    parser: Option<ControlFileParser>,
}

impl<R: BufRead> ControlParagraphReader<R> {
    /// Create a new instance bound to a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(ControlFileParser::default()),
        }
    }
}

impl<R: BufRead> Iterator for ControlParagraphReader<R> {
    type Item = Result<ControlParagraph>;

    fn next(&mut self) -> Option<Self::Item> {
        let parser = self.parser.as_mut()?;

        let mut line = String::new();
        loop {
            line.clear();

            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    // EOF. Flush whatever the parser is holding.
                    let parser = self.parser.take().expect("parser present until EOF");

                    return match parser.finish() {
                        Ok(Some(paragraph)) => Some(Ok(paragraph)),
                        Ok(None) => None,
                        Err(e) => Some(Err(e)),
                    };
                }
                Ok(_) => {
                    let trimmed = line.trim_end_matches(['\r', '\n']);

                    match parser.write_line(trimmed) {
                        Ok(Some(paragraph)) => return Some(Ok(paragraph)),
                        Ok(None) => {}
                        Err(e) => {
                            self.parser = None;
                            return Some(Err(e));
                        }
                    }
                }
                Err(e) => {
                    self.parser = None;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}
