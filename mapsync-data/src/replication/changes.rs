//! Streaming parser for `osmChange` documents.

use std::io::{BufRead, BufReader, Read};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use mapsync_core::{Change, ChangeKind, Entity, EntityKind, Info, Member, Node, Relation, Way};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::ReplicationError;

/// Parse a gzip-compressed change document (`.osc.gz`).
pub fn parse_compressed_changes(reader: impl Read) -> Result<Vec<Change>, ReplicationError> {
    parse_changes(BufReader::new(GzDecoder::new(reader)))
}

/// Parse a change document into its changes, in document order.
///
/// Nodes without coordinates (typical of deletions) get NaN coordinates;
/// a missing `changeset` or `uid` reads as `-1`. Unknown children of an
/// entity are skipped.
///
/// # Examples
/// ```
/// use mapsync_core::{ChangeKind, EntityKind};
/// use mapsync_data::replication::parse_changes;
///
/// let xml = r#"<osmChange><delete><way id="3" version="2"/></delete></osmChange>"#;
/// let changes = parse_changes(xml.as_bytes())?;
/// assert_eq!(changes[0].kind, ChangeKind::Delete);
/// assert_eq!(changes[0].elements[0].kind(), EntityKind::Way);
/// # Ok::<(), mapsync_data::replication::ReplicationError>(())
/// ```
pub fn parse_changes(reader: impl BufRead) -> Result<Vec<Change>, ReplicationError> {
    ChangeParser::new(reader).parse()
}

struct ChangeParser<R> {
    reader: Reader<R>,
    changes: Vec<Change>,
    change: Option<Change>,
    entity: Option<Entity>,
}

impl<R: BufRead> ChangeParser<R> {
    fn new(reader: R) -> Self {
        let mut reader = Reader::from_reader(reader);
        reader.config_mut().trim_text(true);
        Self {
            reader,
            changes: Vec::new(),
            change: None,
            entity: None,
        }
    }

    fn position(&self) -> u64 {
        u64::try_from(self.reader.buffer_position()).unwrap_or(u64::MAX)
    }

    fn parse(mut self) -> Result<Vec<Change>, ReplicationError> {
        let mut buffer = Vec::new();
        loop {
            let event = self
                .reader
                .read_event_into(&mut buffer)
                .map_err(|source| ReplicationError::Xml {
                    position: self.position(),
                    source,
                })?;
            match event {
                Event::Start(start) => self.open(&start, false)?,
                Event::Empty(start) => self.open(&start, true)?,
                Event::End(end) => self.close(end.name().as_ref()),
                Event::Eof => break,
                _ => {}
            }
            buffer.clear();
        }
        if let Some(change) = self.change.take() {
            self.changes.push(change);
        }
        Ok(self.changes)
    }

    fn open(&mut self, start: &BytesStart<'_>, empty: bool) -> Result<(), ReplicationError> {
        let qualified = start.name();
        let name = qualified.as_ref();
        if let Some(kind) = change_kind(name) {
            self.finish_change();
            let change = Change::new(kind, Vec::new());
            if empty {
                self.changes.push(change);
            } else {
                self.change = Some(change);
            }
            return Ok(());
        }
        match name {
            b"osmChange" => Ok(()),
            b"node" | b"way" | b"relation" => {
                if self.change.is_none() {
                    return Err(self.unexpected(name));
                }
                let attributes = self.attributes(element_label(name), start)?;
                let entity = attributes.entity(name)?;
                if empty {
                    self.push_entity(entity);
                } else {
                    self.entity = Some(entity);
                }
                Ok(())
            }
            b"tag" => self.tag(start),
            b"nd" => self.node_reference(start),
            b"member" => self.member(start),
            _ if self.entity.is_some() => Ok(()),
            _ => Err(self.unexpected(name)),
        }
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"node" | b"way" | b"relation" => {
                if let Some(entity) = self.entity.take() {
                    self.push_entity(entity);
                }
            }
            _ if change_kind(name).is_some() => self.finish_change(),
            _ => {}
        }
    }

    fn finish_change(&mut self) {
        if let Some(change) = self.change.take() {
            self.changes.push(change);
        }
    }

    fn push_entity(&mut self, entity: Entity) {
        if let Some(change) = self.change.as_mut() {
            change.elements.push(entity);
        }
    }

    fn tag(&mut self, start: &BytesStart<'_>) -> Result<(), ReplicationError> {
        let attributes = self.attributes("tag", start)?;
        let key = attributes.required_text("k")?.to_owned();
        let value = attributes.text("v").unwrap_or_default().to_owned();
        match self.entity.as_mut() {
            Some(Entity::Node(node)) => node.tags.insert(key, value),
            Some(Entity::Way(way)) => way.tags.insert(key, value),
            Some(Entity::Relation(relation)) => relation.tags.insert(key, value),
            None => return Err(self.unexpected(b"tag")),
        };
        Ok(())
    }

    fn node_reference(&mut self, start: &BytesStart<'_>) -> Result<(), ReplicationError> {
        let attributes = self.attributes("nd", start)?;
        let reference = attributes.required("ref")?;
        match self.entity.as_mut() {
            Some(Entity::Way(way)) => {
                way.nodes.push(reference);
                Ok(())
            }
            _ => Err(self.unexpected(b"nd")),
        }
    }

    fn member(&mut self, start: &BytesStart<'_>) -> Result<(), ReplicationError> {
        let attributes = self.attributes("member", start)?;
        let reference = attributes.required("ref")?;
        let kind_label = attributes.required_text("type")?;
        let kind = EntityKind::parse(kind_label)
            .ok_or_else(|| attributes.invalid("type", kind_label))?;
        let role = attributes.text("role").unwrap_or_default();
        match self.entity.as_mut() {
            Some(Entity::Relation(relation)) => {
                relation.members.push(Member::new(reference, kind, role));
                Ok(())
            }
            _ => Err(self.unexpected(b"member")),
        }
    }

    fn attributes(
        &self,
        element: &'static str,
        start: &BytesStart<'_>,
    ) -> Result<Attributes, ReplicationError> {
        let position = self.position();
        let xml_error = |source| ReplicationError::Xml { position, source };
        let mut values = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|err| xml_error(err.into()))?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute.unescape_value().map_err(xml_error)?.into_owned();
            values.push((key, value));
        }
        Ok(Attributes {
            element,
            position,
            values,
        })
    }

    fn unexpected(&self, name: &[u8]) -> ReplicationError {
        ReplicationError::UnexpectedElement {
            element: String::from_utf8_lossy(name).into_owned(),
            position: self.position(),
        }
    }
}

fn change_kind(name: &[u8]) -> Option<ChangeKind> {
    std::str::from_utf8(name).ok().and_then(ChangeKind::parse)
}

fn element_label(name: &[u8]) -> &'static str {
    match name {
        b"node" => "node",
        b"way" => "way",
        _ => "relation",
    }
}

/// Attributes of one element, decoded up front.
struct Attributes {
    element: &'static str,
    position: u64,
    values: Vec<(String, String)>,
}

impl Attributes {
    fn text(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn required_text(&self, name: &'static str) -> Result<&str, ReplicationError> {
        self.text(name).ok_or(ReplicationError::MissingAttribute {
            element: self.element,
            attribute: name,
            position: self.position,
        })
    }

    fn required<T: FromStr>(&self, name: &'static str) -> Result<T, ReplicationError> {
        let text = self.required_text(name)?;
        text.parse().map_err(|_| self.invalid(name, text))
    }

    fn optional<T: FromStr>(&self, name: &'static str, default: T) -> Result<T, ReplicationError> {
        self.text(name).map_or(Ok(default), |text| {
            text.parse().map_err(|_| self.invalid(name, text))
        })
    }

    fn invalid(&self, name: &'static str, value: &str) -> ReplicationError {
        ReplicationError::InvalidAttribute {
            element: self.element,
            attribute: name,
            value: value.to_owned(),
            position: self.position,
        }
    }

    fn info(&self) -> Result<Info, ReplicationError> {
        let timestamp = self
            .text("timestamp")
            .map(|text| {
                DateTime::parse_from_rfc3339(text)
                    .map(|timestamp| timestamp.with_timezone(&Utc))
                    .map_err(|_| self.invalid("timestamp", text))
            })
            .transpose()?;
        Ok(Info {
            version: self.optional("version", 0)?,
            timestamp,
            changeset: self.optional("changeset", -1)?,
            uid: self.optional("uid", -1)?,
        })
    }

    fn entity(&self, name: &[u8]) -> Result<Entity, ReplicationError> {
        let id = self.required("id")?;
        let info = self.info()?;
        let entity = match name {
            b"node" => {
                let mut node = Node::new(
                    id,
                    self.optional("lon", f64::NAN)?,
                    self.optional("lat", f64::NAN)?,
                );
                node.info = info;
                Entity::Node(node)
            }
            b"way" => {
                let mut way = Way::new(id, Vec::new());
                way.info = info;
                Entity::Way(way)
            }
            _ => {
                let mut relation = Relation::new(id, Vec::new());
                relation.info = info;
                Entity::Relation(relation)
            }
        };
        Ok(entity)
    }
}
