//! Duplicate label rewriting for assembled ontology documents.
//!
//! Classes that share a parent and a (case-insensitive) label get their
//! source database and accession appended: `Foo` becomes `Foo (UniProt P1)`.
//! Only the label text of the affected lines changes; every other byte of the
//! document is copied through as is.

use std::collections::HashMap;
use std::fs;
use std::ops::Range;
use std::path::Path;

use clap::ValueEnum;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::TreeError;
use crate::store::BuildLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentSyntax {
    RdfXml,
    Turtle,
}

impl DocumentSyntax {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("ttl") => DocumentSyntax::Turtle,
            _ => DocumentSyntax::RdfXml,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Marker {
    ClassStart(String),
    Parent(String),
    Label(Range<usize>),
    Accession(String),
    SourceDatabase(String),
    BlockEnd,
}

struct Tokenizer {
    syntax: DocumentSyntax,
    class_start: Regex,
    anonymous_class: Regex,
    parent: Regex,
    label: Regex,
    accession: Regex,
    source_database: Regex,
    block_end: Regex,
    literal: Regex,
}

fn pattern(source: &str) -> Result<Regex, TreeError> {
    Regex::new(source).map_err(|err| TreeError::Pattern(err.to_string()))
}

impl Tokenizer {
    fn new(syntax: DocumentSyntax) -> Result<Self, TreeError> {
        let literal = pattern(r#""((?:[^"\\]|\\.)*)""#)?;
        match syntax {
            DocumentSyntax::RdfXml => Ok(Self {
                syntax,
                class_start: pattern(r#"<owl:Class\s+rdf:about="([^"]*)""#)?,
                anonymous_class: pattern(r"<owl:Class\s*>")?,
                parent: pattern(r#"<rdfs:subClassOf\s+rdf:resource="([^"]*)""#)?,
                label: pattern(r"<rdfs:label(?:\s[^>]*)?>([^<]*)</rdfs:label>")?,
                accession: pattern(r"<iedb:has-accession(?:\s[^>]*)?>([^<]*)</iedb:has-accession>")?,
                source_database: pattern(
                    r"<iedb:has-source-database(?:\s[^>]*)?>([^<]*)</iedb:has-source-database>",
                )?,
                block_end: pattern(r"<owl:Class\s[^>]*/>")?,
                literal,
            }),
            DocumentSyntax::Turtle => Ok(Self {
                syntax,
                class_start: pattern(r"^(<[^>\s]*>|[A-Za-z][\w.-]*:[\w.-]*|_:\S+)\s")?,
                anonymous_class: pattern(r"\[")?,
                parent: pattern(r"rdfs:subClassOf\s+(<[^>\s]*>|[A-Za-z][\w.-]*:[\w.-]*)")?,
                label: pattern(r#"rdfs:label\s+"((?:[^"\\]|\\.)*)""#)?,
                accession: pattern(r#"iedb:has-accession\s+"((?:[^"\\]|\\.)*)""#)?,
                source_database: pattern(r#"iedb:has-source-database\s+"((?:[^"\\]|\\.)*)""#)?,
                block_end: pattern(r"\.\s*(?:#.*)?$")?,
                literal,
            }),
        }
    }

    /// Markers found on one line. `depth` tracks nesting inside anonymous
    /// class expressions, whose contents never describe the enclosing class.
    fn markers(&self, line: &str, depth: &mut usize) -> Vec<Marker> {
        match self.syntax {
            DocumentSyntax::RdfXml => self.xml_markers(line, depth),
            DocumentSyntax::Turtle => self.turtle_markers(line, depth),
        }
    }

    fn xml_markers(&self, line: &str, depth: &mut usize) -> Vec<Marker> {
        let mut markers = Vec::new();
        let outer = *depth == 0;
        if outer {
            if let Some(caps) = self.class_start.captures(line) {
                markers.push(Marker::ClassStart(caps[1].to_string()));
            }
            let visible = match self.anonymous_class.find(line) {
                Some(found) => &line[..found.start()],
                None => line,
            };
            self.field_markers(visible, &mut markers);
        }
        let open = *depth + self.anonymous_class.find_iter(line).count();
        let closes = line.matches("</owl:Class>").count();
        *depth = open.saturating_sub(closes);
        // A close left over after the anonymous ones belongs to the named class.
        if closes > open || (outer && self.block_end.is_match(line)) {
            markers.push(Marker::BlockEnd);
        }
        markers
    }

    fn turtle_markers(&self, line: &str, depth: &mut usize) -> Vec<Marker> {
        let mut markers = Vec::new();
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return markers;
        }
        let bare = self.literal.replace_all(line, "\"\"");
        let opens = bare.matches('[').count();
        let closes = bare.matches(']').count();
        if *depth == 0 {
            if !trimmed.starts_with('@') {
                if let Some(caps) = self.class_start.captures(line) {
                    markers.push(Marker::ClassStart(
                        caps[1].trim_start_matches('<').trim_end_matches('>').to_string(),
                    ));
                }
            }
            self.field_markers(line, &mut markers);
        }
        *depth = (*depth + opens).saturating_sub(closes);
        if *depth == 0 && self.block_end.is_match(&bare) {
            markers.push(Marker::BlockEnd);
        }
        markers
    }

    fn field_markers(&self, line: &str, markers: &mut Vec<Marker>) {
        if let Some(caps) = self.parent.captures(line) {
            markers.push(Marker::Parent(caps[1].to_string()));
        }
        if let Some(span) = self.label.captures(line).and_then(|caps| caps.get(1)) {
            markers.push(Marker::Label(span.range()));
        }
        if let Some(caps) = self.accession.captures(line) {
            markers.push(Marker::Accession(caps[1].to_string()));
        }
        if let Some(caps) = self.source_database.captures(line) {
            markers.push(Marker::SourceDatabase(caps[1].to_string()));
        }
    }
}

/// A database-backed class with the position of its label text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRecord {
    pub iri: String,
    pub parent: String,
    pub label: String,
    pub accession: String,
    pub source_database: String,
    /// 1-based line holding the label.
    pub line: usize,
    /// Byte range of the label text within that line.
    pub span: Range<usize>,
}

impl ClassRecord {
    fn suffix(&self) -> String {
        format!(" ({} {})", self.source_database, self.accession)
    }

    pub fn disambiguated_label(&self) -> String {
        format!("{}{}", self.label, self.suffix())
    }
}

#[derive(Default)]
struct PartialRecord {
    iri: Option<String>,
    parent: Option<String>,
    label: Option<(String, usize, Range<usize>)>,
    accession: Option<String>,
    source_database: Option<String>,
}

impl PartialRecord {
    fn finish(self) -> Option<ClassRecord> {
        let (label, line, span) = self.label?;
        Some(ClassRecord {
            iri: self.iri?,
            parent: self.parent?,
            label,
            accession: self.accession?,
            source_database: self.source_database?,
            line,
            span,
        })
    }
}

/// Pass one: class records in document order. Blocks without an accession and
/// source database are internal classes and are dropped at their block end.
pub fn parse_classes(text: &str, syntax: DocumentSyntax) -> Result<Vec<ClassRecord>, TreeError> {
    let tokenizer = Tokenizer::new(syntax)?;
    let mut records = Vec::new();
    let mut current: Option<PartialRecord> = None;
    let mut depth = 0usize;
    for (index, line) in text.split_inclusive('\n').enumerate() {
        for marker in tokenizer.markers(line, &mut depth) {
            match marker {
                Marker::ClassStart(iri) => {
                    current = Some(PartialRecord {
                        iri: Some(iri),
                        ..PartialRecord::default()
                    });
                }
                Marker::BlockEnd => {
                    if let Some(record) = current.take().and_then(PartialRecord::finish) {
                        records.push(record);
                    }
                }
                field => {
                    let Some(partial) = current.as_mut() else {
                        continue;
                    };
                    match field {
                        Marker::Parent(parent) => {
                            partial.parent.get_or_insert(parent);
                        }
                        Marker::Label(span) => {
                            partial
                                .label
                                .get_or_insert_with(|| (line[span.clone()].to_string(), index + 1, span));
                        }
                        Marker::Accession(accession) => {
                            partial.accession.get_or_insert(accession);
                        }
                        Marker::SourceDatabase(source) => {
                            partial.source_database.get_or_insert(source);
                        }
                        Marker::ClassStart(_) | Marker::BlockEnd => {}
                    }
                }
            }
        }
    }
    if let Some(record) = current.and_then(PartialRecord::finish) {
        records.push(record);
    }
    Ok(records)
}

/// Classes sharing a parent and a case-insensitive label.
#[derive(Debug, Clone)]
pub struct DuplicateGroup<'a> {
    pub parent: &'a str,
    pub label: String,
    pub members: Vec<&'a ClassRecord>,
}

/// Groups of two or more, in order of first appearance.
pub fn duplicate_groups(records: &[ClassRecord]) -> Vec<DuplicateGroup<'_>> {
    let mut index: HashMap<(&str, String), usize> = HashMap::new();
    let mut groups: Vec<DuplicateGroup<'_>> = Vec::new();
    for record in records {
        let label = record.label.to_lowercase();
        match index.get(&(record.parent.as_str(), label.clone())) {
            Some(&position) => groups[position].members.push(record),
            None => {
                index.insert((record.parent.as_str(), label.clone()), groups.len());
                groups.push(DuplicateGroup {
                    parent: &record.parent,
                    label,
                    members: vec![record],
                });
            }
        }
    }
    groups.retain(|group| group.members.len() > 1);
    groups
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelRewrite {
    pub line: usize,
    pub iri: String,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DisambiguationReport {
    pub classes: usize,
    pub groups: usize,
    pub rewrites: Vec<LabelRewrite>,
}

#[derive(Debug, Clone)]
pub struct Disambiguation {
    pub text: String,
    pub report: DisambiguationReport,
}

/// Both passes over an in-memory document.
pub fn disambiguate(text: &str, syntax: DocumentSyntax) -> Result<Disambiguation, TreeError> {
    let records = parse_classes(text, syntax)?;
    let groups = duplicate_groups(&records);

    let mut edits: HashMap<usize, (&ClassRecord, String)> = HashMap::new();
    for group in &groups {
        for record in &group.members {
            // Exact duplicates already carry their suffix after one pass.
            if record.label.ends_with(&record.suffix()) {
                continue;
            }
            edits
                .entry(record.line)
                .or_insert_with(|| (*record, record.disambiguated_label()));
        }
    }

    let mut out = String::with_capacity(text.len() + edits.len() * 24);
    let mut rewrites = Vec::with_capacity(edits.len());
    for (index, line) in text.split_inclusive('\n').enumerate() {
        match edits.get(&(index + 1)) {
            Some((record, label)) => {
                out.push_str(&line[..record.span.start]);
                out.push_str(label);
                out.push_str(&line[record.span.end..]);
                debug!(line = record.line, iri = %record.iri, %label, "rewrote label");
                rewrites.push(LabelRewrite {
                    line: record.line,
                    iri: record.iri.clone(),
                    before: record.label.clone(),
                    after: label.clone(),
                });
            }
            None => out.push_str(line),
        }
    }

    Ok(Disambiguation {
        text: out,
        report: DisambiguationReport {
            classes: records.len(),
            groups: groups.len(),
            rewrites,
        },
    })
}

/// Disambiguates `input` into `output`, which may be the same file. The
/// output is replaced atomically and left untouched when nothing changes in
/// place.
pub fn disambiguate_file(
    input: &Path,
    output: &Path,
    syntax: DocumentSyntax,
) -> Result<DisambiguationReport, TreeError> {
    let text = fs::read_to_string(input).map_err(|err| TreeError::DocumentRead {
        path: input.to_path_buf(),
        message: err.to_string(),
    })?;
    let result = disambiguate(&text, syntax)?;
    if input != output || !result.report.rewrites.is_empty() {
        BuildLayout::write_bytes_atomic(output, result.text.as_bytes())?;
    }
    info!(
        classes = result.report.classes,
        groups = result.report.groups,
        rewrites = result.report.rewrites.len(),
        "disambiguated labels"
    );
    Ok(result.report)
}
