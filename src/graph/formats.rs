//! On-disk graph formats.
//!
//! GraphML is read and written with `quick-xml`; gzip-compressed GraphML is
//! unwrapped with `flate2`; CSV edge lists are read with the `csv` crate.

use crate::core::error::{MotifStudioError, Result};
use crate::graph::{AttributeSchema, Attributes, HostGraph};
use flate2::read::GzDecoder;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

const ORIGIN: &str = "graph:formats";

/// File suffixes a single-file graph may carry.
pub const GRAPH_FILE_SUFFIXES: &[&str] = &[".graphml", ".graphml.gz", ".csv"];

/// Export formats understood by [`export_graph`].
pub const EXPORT_FORMATS: &[&str] = &["graphml"];

/// Returns true when `name` ends with a readable graph suffix.
#[must_use]
pub fn has_graph_suffix(name: &str) -> bool {
    GRAPH_FILE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Reads a graph file, choosing the reader from the file suffix.
pub fn read_graph_file(path: &Path) -> Result<HostGraph> {
    let name = path.to_string_lossy();
    let file = File::open(path).map_err(|e| {
        MotifStudioError::backend_io(format!("Failed to open {name}: {e}"), ORIGIN)
            .with_context("path", name.to_string())
    })?;

    if name.ends_with(".graphml.gz") {
        read_graphml(BufReader::new(GzDecoder::new(file)))
    } else if name.ends_with(".graphml") {
        read_graphml(BufReader::new(file))
    } else if name.ends_with(".csv") {
        read_csv_edge_list(file)
    } else {
        Err(
            MotifStudioError::backend_io(format!("Unsupported graph file: {name}"), ORIGIN)
                .with_hint("Supported suffixes: .graphml, .graphml.gz, .csv"),
        )
    }
}

/// Renders a graph in the named export format.
pub fn export_graph(graph: &HostGraph, format: &str) -> Result<String> {
    match format {
        "graphml" => write_graphml(graph),
        other => Err(MotifStudioError::invalid_query(
            format!("Unsupported download format: {other}"),
            ORIGIN,
        )
        .with_hint(format!("Supported formats: {}", EXPORT_FORMATS.join(", ")))),
    }
}

#[derive(Debug, Clone)]
struct KeySpec {
    name: String,
    kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    Node,
    Edge,
    Other,
}

/// Parses GraphML. Attribute values are typed from each `<key attr.type>`.
pub fn read_graphml<R: BufRead>(source: R) -> Result<HostGraph> {
    let mut reader = Reader::from_reader(source);
    reader.trim_text(true);

    let mut keys: HashMap<String, KeySpec> = HashMap::new();
    let mut graph: Option<HostGraph> = None;
    let mut element = Element::Other;
    let mut current_node: Option<(String, Attributes)> = None;
    let mut current_edge: Option<(String, String, Attributes)> = None;
    let mut current_key: Option<String> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| malformed(format!("GraphML parse error: {e}")))?;
        match event {
            Event::Start(ref start) | Event::Empty(ref start) => {
                let is_empty = matches!(event, Event::Empty(_));
                let attrs = attributes_of(start)?;
                match start.local_name().as_ref() {
                    b"key" => {
                        if let Some(id) = attrs.get("id") {
                            keys.insert(
                                id.clone(),
                                KeySpec {
                                    name: attrs
                                        .get("attr.name")
                                        .cloned()
                                        .unwrap_or_else(|| id.clone()),
                                    kind: attrs
                                        .get("attr.type")
                                        .cloned()
                                        .unwrap_or_else(|| "string".to_string()),
                                },
                            );
                        }
                    }
                    b"graph" => {
                        let directed = attrs
                            .get("edgedefault")
                            .is_some_and(|d| d == "directed");
                        graph.get_or_insert_with(|| HostGraph::new(directed));
                    }
                    b"node" => {
                        let id = required(&attrs, "id", "node")?;
                        if is_empty {
                            target_graph(&mut graph)?.add_vertex(id, Attributes::new());
                        } else {
                            element = Element::Node;
                            current_node = Some((id, Attributes::new()));
                        }
                    }
                    b"edge" => {
                        let source = required(&attrs, "source", "edge")?;
                        let target = required(&attrs, "target", "edge")?;
                        if is_empty {
                            target_graph(&mut graph)?.add_edge(source, target, Attributes::new());
                        } else {
                            element = Element::Edge;
                            current_edge = Some((source, target, Attributes::new()));
                        }
                    }
                    b"data" if !is_empty => {
                        current_key = attrs.get("key").cloned();
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if current_key.is_some() {
                    let chunk = t
                        .unescape()
                        .map_err(|e| malformed(format!("GraphML text error: {e}")))?;
                    text.push_str(&chunk);
                }
            }
            Event::CData(ref t) => {
                if current_key.is_some() {
                    text.push_str(&String::from_utf8_lossy(t));
                }
            }
            Event::End(ref end) => match end.local_name().as_ref() {
                b"data" => {
                    if let Some(key) = current_key.take() {
                        let (name, value) = match keys.get(&key) {
                            Some(key) => (key.name.clone(), typed_value(&text, &key.kind)),
                            None => (key, Value::String(text.clone())),
                        };
                        match element {
                            Element::Node => {
                                if let Some((_, attributes)) = current_node.as_mut() {
                                    attributes.insert(name, value);
                                }
                            }
                            Element::Edge => {
                                if let Some((_, _, attributes)) = current_edge.as_mut() {
                                    attributes.insert(name, value);
                                }
                            }
                            Element::Other => {}
                        }
                    }
                }
                b"node" => {
                    if let Some((id, attributes)) = current_node.take() {
                        target_graph(&mut graph)?.add_vertex(id, attributes);
                    }
                    element = Element::Other;
                }
                b"edge" => {
                    if let Some((source, target, attributes)) = current_edge.take() {
                        target_graph(&mut graph)?.add_edge(source, target, attributes);
                    }
                    element = Element::Other;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    graph.ok_or_else(|| malformed("GraphML document has no <graph> element"))
}

fn target_graph(graph: &mut Option<HostGraph>) -> Result<&mut HostGraph> {
    graph
        .as_mut()
        .ok_or_else(|| malformed("GraphML element outside of <graph>"))
}

fn attributes_of(start: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| malformed(format!("GraphML attribute error: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| malformed(format!("GraphML attribute error: {e}")))?;
        out.insert(key, value.into_owned());
    }
    Ok(out)
}

fn required(attrs: &HashMap<String, String>, name: &str, element: &str) -> Result<String> {
    attrs
        .get(name)
        .cloned()
        .ok_or_else(|| malformed(format!("<{element}> is missing the `{name}` attribute")))
}

fn typed_value(raw: &str, kind: &str) -> Value {
    let raw = raw.trim();
    match kind {
        "int" | "long" => raw.parse::<i64>().map_or_else(|_| raw.into(), Value::from),
        "float" | "double" => raw.parse::<f64>().map_or_else(|_| raw.into(), Value::from),
        "boolean" => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => raw.into(),
        },
        _ => Value::String(raw.to_string()),
    }
}

fn malformed(message: impl Into<String>) -> MotifStudioError {
    MotifStudioError::backend_io(message, ORIGIN).with_context("format", "graphml")
}

/// Reads an undirected CSV edge list. The header row names the columns;
/// the first two are source and target, the rest become edge attributes.
pub fn read_csv_edge_list<R: Read>(source: R) -> Result<HostGraph> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(source);
    let headers = reader
        .headers()
        .map_err(|e| csv_error(&e))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    if headers.len() < 2 {
        return Err(MotifStudioError::backend_io(
            "CSV edge list needs at least source and target columns",
            ORIGIN,
        ));
    }

    let mut graph = HostGraph::new(false);
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(&e))?;
        let (Some(source), Some(target)) = (record.get(0), record.get(1)) else {
            continue;
        };
        let attributes = headers
            .iter()
            .zip(record.iter())
            .skip(2)
            .filter(|(_, raw)| !raw.is_empty())
            .map(|(name, raw)| (name.clone(), infer_value(raw)))
            .collect();
        graph.add_edge(source, target, attributes);
    }
    Ok(graph)
}

/// Parses a bare CSV cell as int, then float, then bool, falling back to a string.
pub(crate) fn infer_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::from(f);
    }
    match raw {
        "true" | "True" => Value::Bool(true),
        "false" | "False" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

fn csv_error(err: &csv::Error) -> MotifStudioError {
    MotifStudioError::backend_io(format!("CSV read error: {err}"), ORIGIN)
        .with_context("format", "csv")
}

/// Serializes a graph as GraphML.
pub fn write_graphml(graph: &HostGraph) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let vertex_keys = key_table(&graph.vertex_attribute_schema(), "n");
    let edge_keys = key_table(&graph.edge_attribute_schema(), "e");

    let xml = |e: quick_xml::Error| {
        MotifStudioError::system("graphml_write_failed", e.to_string(), ORIGIN)
    };

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml)?;
    writer
        .write_event(Event::Start(BytesStart::new("graphml").with_attributes([(
            "xmlns",
            "http://graphml.graphdrawing.org/xmlns",
        )])))
        .map_err(xml)?;

    for (domain, table) in [("node", &vertex_keys), ("edge", &edge_keys)] {
        for (name, (id, kind)) in table {
            writer
                .write_event(Event::Empty(BytesStart::new("key").with_attributes([
                    ("id", id.as_str()),
                    ("for", domain),
                    ("attr.name", name.as_str()),
                    ("attr.type", *kind),
                ])))
                .map_err(xml)?;
        }
    }

    let edgedefault = if graph.is_directed() {
        "directed"
    } else {
        "undirected"
    };
    writer
        .write_event(Event::Start(
            BytesStart::new("graph").with_attributes([("edgedefault", edgedefault)]),
        ))
        .map_err(xml)?;

    for vertex in graph.vertices() {
        let start = BytesStart::new("node").with_attributes([("id", vertex.id.as_str())]);
        write_element(&mut writer, start, "node", &vertex.attributes, &vertex_keys).map_err(xml)?;
    }
    for edge in graph.edges() {
        let start = BytesStart::new("edge").with_attributes([
            ("source", edge.source.as_str()),
            ("target", edge.target.as_str()),
        ]);
        write_element(&mut writer, start, "edge", &edge.attributes, &edge_keys).map_err(xml)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("graph")))
        .map_err(xml)?;
    writer
        .write_event(Event::End(BytesEnd::new("graphml")))
        .map_err(xml)?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| MotifStudioError::system("graphml_write_failed", e.to_string(), ORIGIN))
}

type KeyTable = std::collections::BTreeMap<String, (String, &'static str)>;

fn key_table(schema: &AttributeSchema, prefix: &str) -> KeyTable {
    schema
        .iter()
        .enumerate()
        .map(|(i, (name, kind))| {
            let graphml_type = match kind.as_deref() {
                Some("int") => "long",
                Some("float") => "double",
                Some("bool") => "boolean",
                _ => "string",
            };
            (name.clone(), (format!("{prefix}{i}"), graphml_type))
        })
        .collect()
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    start: BytesStart<'_>,
    tag: &str,
    attributes: &Attributes,
    keys: &KeyTable,
) -> std::result::Result<(), quick_xml::Error> {
    if attributes.is_empty() {
        return writer.write_event(Event::Empty(start));
    }
    writer.write_event(Event::Start(start))?;
    for (name, value) in attributes {
        let Some((id, _)) = keys.get(name) else {
            continue;
        };
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        writer.write_event(Event::Start(
            BytesStart::new("data").with_attributes([("key", id.as_str())]),
        ))?;
        writer.write_event(Event::Text(BytesText::new(&text)))?;
        writer.write_event(Event::End(BytesEnd::new("data")))?;
    }
    writer.write_event(Event::End(BytesEnd::new(tag)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<graphml xmlns="http://graphml.graphdrawing.org/xmlns">
  <key id="d0" for="node" attr.name="size" attr.type="int"/>
  <key id="d1" for="edge" attr.name="weight" attr.type="double"/>
  <key id="d2" for="node" attr.name="hub" attr.type="boolean"/>
  <graph edgedefault="directed">
    <node id="a"><data key="d0">3</data><data key="d2">true</data></node>
    <node id="b"><data key="d0">5</data></node>
    <node id="c"/>
    <edge source="a" target="b"><data key="d1">0.5</data></edge>
    <edge source="b" target="c"/>
  </graph>
</graphml>"#;

    #[test]
    fn reads_typed_graphml() {
        let graph = read_graphml(SAMPLE.as_bytes()).expect("read");
        assert!(graph.is_directed());
        assert_eq!(graph.vertex_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        let a = graph.vertex("a").expect("a");
        assert_eq!(a.attributes.get("size"), Some(&Value::from(3)));
        assert_eq!(a.attributes.get("hub"), Some(&Value::Bool(true)));
        assert_eq!(graph.edges()[0].attributes.get("weight"), Some(&Value::from(0.5)));
    }

    #[test]
    fn graphml_survives_write_and_read() {
        let graph = read_graphml(SAMPLE.as_bytes()).expect("read");
        let written = write_graphml(&graph).expect("write");
        let again = read_graphml(written.as_bytes()).expect("reread");
        assert_eq!(again.vertex_count(), 3);
        assert_eq!(again.edge_count(), 2);
        assert_eq!(
            again.vertex_attribute_schema(),
            graph.vertex_attribute_schema()
        );
    }

    #[test]
    fn reads_gzipped_graphml_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("g.graphml.gz");
        let mut encoder = GzEncoder::new(File::create(&path).expect("create"), Compression::fast());
        encoder.write_all(SAMPLE.as_bytes()).expect("write");
        encoder.finish().expect("finish");

        let graph = read_graph_file(&path).expect("read");
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn reads_csv_edge_list_as_undirected() {
        let csv = "source,target,weight\na,b,2\nb,c,1.5\nc,a,\n";
        let graph = read_csv_edge_list(csv.as_bytes()).expect("read");
        assert!(!graph.is_directed());
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.edges()[0].attributes.get("weight"), Some(&Value::from(2)));
        assert!(graph.edges()[2].attributes.is_empty());
    }

    #[test]
    fn rejects_unknown_suffix_and_format() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("g.gexf");
        std::fs::write(&path, "<gexf/>").expect("write");
        assert_eq!(read_graph_file(&path).expect_err("gexf").code, "backend_io");

        let graph = HostGraph::new(true);
        assert_eq!(export_graph(&graph, "gml").expect_err("gml").code, "invalid_query");
    }

    #[test]
    fn missing_graph_element_is_an_error() {
        let err = read_graphml("<graphml></graphml>".as_bytes()).expect_err("empty");
        assert_eq!(err.code, "backend_io");
    }
}
