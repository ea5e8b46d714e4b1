//! Post-processing of the SVG produced by the layout engine: interactivity
//! payloads, edge labels curved along their paths and the graph structure
//! embedded as `<links>` metadata for the hover script.

use anyhow::{anyhow, bail, Result};
use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::warn;

use crate::graph::{NodeType, PlaybookGraph};

/// Fraction of the edge path at which the label is anchored. The tail of the
/// path is covered by the arrow head, so the label sits past the middle.
pub const LABEL_OFFSET_FACTOR: f64 = 0.76;
/// Tolerance used when measuring curve lengths by adaptive subdivision.
pub const ARC_LENGTH_TOLERANCE: f64 = 1e-4;

const JQUERY_URL: &str = "https://ajax.googleapis.com/ajax/libs/jquery/3.7.1/jquery.min.js";
const HIGHLIGHT_SCRIPT: &str = include_str!("../data/highlight-hover.js");
const GRAPH_STYLE: &str = include_str!("../data/graph.css");

#[derive(Debug, Clone)]
enum XmlNode {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

impl Element {
    fn new(name: &str) -> Self {
        Element {
            name: name.to_string(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn set_attr(&mut self, name: &str, value: &str) {
        match self.attrs.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.attrs.push((name.to_string(), value.to_string())),
        }
    }

    fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(key, _)| key != name);
    }

    fn child_element(&self, name: &str) -> Option<&Element> {
        self.children.iter().find_map(|child| match child {
            XmlNode::Element(element) if element.name == name => Some(element),
            _ => None,
        })
    }

    fn child_element_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|child| match child {
            XmlNode::Element(element) if element.name == name => Some(element),
            _ => None,
        })
    }

    fn text_content(&self) -> String {
        let mut text = String::new();
        for child in &self.children {
            if let XmlNode::Text(t) = child {
                text.push_str(t);
            }
        }
        text
    }
}

fn visit_elements_mut(element: &mut Element, f: &mut dyn FnMut(&mut Element)) {
    f(element);
    for child in &mut element.children {
        if let XmlNode::Element(e) = child {
            visit_elements_mut(e, f);
        }
    }
}

fn find_by_id_mut<'a>(element: &'a mut Element, id: &str) -> Option<&'a mut Element> {
    if element.attr("id") == Some(id) {
        return Some(element);
    }
    for child in &mut element.children {
        if let XmlNode::Element(e) = child {
            if let Some(found) = find_by_id_mut(e, id) {
                return Some(found);
            }
        }
    }
    None
}

/// A parsed SVG document. The prolog (XML declaration, doctype and leading
/// comments) is carried over verbatim.
pub struct PostProcessor {
    prolog: String,
    root: Element,
}

impl PostProcessor {
    pub fn parse(svg: &str) -> Result<Self> {
        let mut reader = Reader::from_str(svg);
        let mut prolog = String::new();
        let mut root: Option<Element> = None;
        let mut stack: Vec<Element> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Decl(decl) => {
                    prolog.push_str(&format!("<?{}?>\n", String::from_utf8_lossy(&decl)));
                }
                Event::DocType(doctype) => {
                    prolog.push_str(&format!(
                        "<!DOCTYPE {}>\n",
                        String::from_utf8_lossy(&doctype).trim()
                    ));
                }
                Event::Start(start) => {
                    stack.push(element_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| anyhow!("unbalanced closing tag in the SVG"))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        parent
                            .children
                            .push(XmlNode::Text(text.unescape()?.into_owned()));
                    }
                }
                Event::CData(cdata) => {
                    if let Some(parent) = stack.last_mut() {
                        parent
                            .children
                            .push(XmlNode::CData(String::from_utf8_lossy(&cdata).into_owned()));
                    }
                }
                Event::Comment(comment) => {
                    let raw = String::from_utf8_lossy(&comment).into_owned();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Comment(raw)),
                        None if root.is_none() => prolog.push_str(&format!("<!--{raw}-->\n")),
                        None => {}
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        let root = root.ok_or_else(|| anyhow!("no root element in the SVG document"))?;
        Ok(PostProcessor { prolog, root })
    }

    pub fn post_process(&mut self, playbooks: &[PlaybookGraph], collapsible: bool) -> Result<()> {
        self.root.set_attr("id", "svg");
        self.insert_payloads();
        self.curve_edge_labels();
        if collapsible {
            self.insert_collapse_buttons();
        }
        for playbook in playbooks {
            self.insert_links(playbook);
        }
        Ok(())
    }

    pub fn to_svg(&self) -> Result<String> {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, &self.root)?;
        let body = String::from_utf8(writer.into_inner())?;
        Ok(format!("{}{body}\n", self.prolog))
    }

    /// The interactivity payloads always sit at the top of the document:
    /// jquery first, then the hover script, then the stylesheet.
    fn insert_payloads(&mut self) {
        let mut jquery = Element::new("script");
        jquery.set_attr("type", "text/javascript");
        jquery.set_attr("xlink:href", JQUERY_URL);

        let mut script = Element::new("script");
        script.set_attr("type", "text/javascript");
        script
            .children
            .push(XmlNode::CData(HIGHLIGHT_SCRIPT.to_string()));

        let mut style = Element::new("style");
        style.set_attr("type", "text/css");
        style.children.push(XmlNode::CData(GRAPH_STYLE.to_string()));

        self.root.children.insert(0, XmlNode::Element(jquery));
        self.root.children.insert(1, XmlNode::Element(script));
        self.root.children.insert(2, XmlNode::Element(style));
    }

    /// Rewrite each edge label as a `textPath` anchored along the edge. A
    /// malformed edge leaves its label straight instead of failing the whole
    /// render.
    fn curve_edge_labels(&mut self) {
        visit_elements_mut(&mut self.root, &mut |element| {
            if element.name != "g" || element.attr("class") != Some("edge") {
                return;
            }
            let Some(edge_id) = element.attr("id").map(str::to_string) else {
                return;
            };
            if !edge_id.starts_with("edge_") {
                return;
            }
            if let Err(error) = curve_edge_label(element, &edge_id) {
                warn!(edge = %edge_id, %error, "leaving the edge label straight");
            }
        });
    }

    /// Put a round toggle just above every cluster label. The buttons are
    /// siblings of the cluster groups, not children, so collapsing a cluster
    /// never hides its own toggle.
    fn insert_collapse_buttons(&mut self) {
        insert_collapse_buttons_below(&mut self.root);
    }

    /// Attach a `<links>` child to every composite node's group, listing the
    /// nodes it points to and the ids of the connecting edges. The hover
    /// script walks this metadata to highlight a node's subtree.
    fn insert_links(&mut self, playbook: &PlaybookGraph) {
        // Fix the injection order so that re-rendering the same playbook
        // produces the same bytes.
        let mut links: Vec<_> = playbook.links_structure(playbook.root()).into_iter().collect();
        links.sort_by(|(a, _), (b, _)| {
            playbook.node(*a).id.cmp(&playbook.node(*b).id).then(a.cmp(b))
        });
        for (source, destinations) in links {
            let source_id = playbook.node(source).id.clone();
            let Some(element) = find_by_id_mut(&mut self.root, &source_id) else {
                warn!(node = %source_id, "node not found in the SVG, no links attached");
                continue;
            };
            let mut container = Element::new("links");
            for destination in destinations {
                let data = playbook.node(destination);
                let Some(index) = data.index else { continue };
                let mut link = Element::new("link");
                link.set_attr("target", &data.id);
                link.set_attr("edge", &format!("edge_{index}_{source_id}_{}", data.id));
                // Blocks also reference their cluster wrapper so that
                // hovering highlights the whole region.
                if playbook.node_type(destination) == NodeType::Block {
                    link.set_attr("cluster", &format!("cluster_{}", data.id));
                }
                container.children.push(XmlNode::Element(link));
            }
            element.children.push(XmlNode::Element(container));
        }
    }
}

/// Radius of a collapse toggle and its vertical clearance above the label.
const COLLAPSE_BUTTON_RADIUS: f64 = 6.0;
const COLLAPSE_BUTTON_RAISE: f64 = 16.0;

fn insert_collapse_buttons_below(element: &mut Element) {
    let mut insertions = Vec::new();
    for (position, child) in element.children.iter().enumerate() {
        let XmlNode::Element(group) = child else {
            continue;
        };
        if group.name != "g" || group.attr("class") != Some("cluster") {
            continue;
        }
        let Some(cluster_name) = group.child_element("title").map(Element::text_content) else {
            continue;
        };
        let Some(label) = group.child_element("text") else {
            continue;
        };
        let (Some(Ok(x)), Some(Ok(y))) = (
            label.attr("x").map(str::parse::<f64>),
            label.attr("y").map(str::parse::<f64>),
        ) else {
            continue;
        };
        insertions.push((
            position + 1,
            collapse_button(cluster_name.trim(), x, y - COLLAPSE_BUTTON_RAISE),
        ));
    }
    // Back to front so earlier positions stay valid.
    for (position, button) in insertions.into_iter().rev() {
        element.children.insert(position, XmlNode::Element(button));
    }
    for child in &mut element.children {
        if let XmlNode::Element(e) = child {
            insert_collapse_buttons_below(e);
        }
    }
}

fn collapse_button(cluster_name: &str, x: f64, y: f64) -> Element {
    let mut button = Element::new("g");
    button.set_attr("class", "collapse-button");
    button.set_attr("data-cluster", cluster_name);

    let mut circle = Element::new("circle");
    circle.set_attr("cx", &format!("{x}"));
    circle.set_attr("cy", &format!("{y}"));
    circle.set_attr("r", &format!("{COLLAPSE_BUTTON_RADIUS}"));
    button.children.push(XmlNode::Element(circle));

    let mut sign = Element::new("text");
    sign.set_attr("x", &format!("{x}"));
    sign.set_attr("y", &format!("{}", y + COLLAPSE_BUTTON_RADIUS / 2.0));
    sign.set_attr("text-anchor", "middle");
    sign.children.push(XmlNode::Text("-".to_string()));
    button.children.push(XmlNode::Element(sign));

    button
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(&name);
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut Vec<Element>, root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None => {
            if root.is_some() {
                bail!("more than one root element in the SVG");
            }
            *root = Some(element);
        }
    }
    Ok(())
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attrs {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }
    writer.write_event(Event::Start(start))?;
    for child in &element.children {
        match child {
            XmlNode::Element(e) => write_element(writer, e)?,
            XmlNode::Text(t) => writer.write_event(Event::Text(BytesText::new(t)))?,
            XmlNode::CData(t) => writer.write_event(Event::CData(BytesCData::new(t)))?,
            XmlNode::Comment(t) => {
                writer.write_event(Event::Comment(BytesText::from_escaped(t.as_str())))?
            }
        }
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}

fn curve_edge_label(group: &mut Element, edge_id: &str) -> Result<()> {
    let path_id = format!("path_{edge_id}");
    let path = group
        .child_element_mut("path")
        .ok_or_else(|| anyhow!("no path in the edge group"))?;
    let d = path
        .attr("d")
        .ok_or_else(|| anyhow!("no 'd' attribute on the edge path"))?
        .to_string();
    let length = path_length(&d)?;
    path.set_attr("id", &path_id);

    for child in &mut group.children {
        let XmlNode::Element(text) = child else {
            continue;
        };
        if text.name != "text" {
            continue;
        }
        let label = text.text_content();
        let offset = length * LABEL_OFFSET_FACTOR - label.chars().count() as f64;

        let mut text_path = Element::new("textPath");
        text_path.set_attr("xlink:href", &format!("#{path_id}"));
        text_path.set_attr("startOffset", &format!("{offset}"));
        text_path.children.push(XmlNode::Text(label));

        text.remove_attr("x");
        text.remove_attr("y");
        text.set_attr("dy", "-0.2%");
        text.children = vec![XmlNode::Element(text_path)];
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
struct Point {
    x: f64,
    y: f64,
}

impl Point {
    fn distance(self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    fn midpoint(self, other: Point) -> Point {
        Point {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
        }
    }
}

enum PathSegment {
    Line(Point, Point),
    Cubic(Point, Point, Point, Point),
}

/// Total length of an SVG path. Only the commands the layout engine emits
/// are supported: absolute and relative move, line, cubic and close.
fn path_length(d: &str) -> Result<f64> {
    let mut length = 0.0;
    for segment in parse_path(d)? {
        length += match segment {
            PathSegment::Line(from, to) => from.distance(to),
            PathSegment::Cubic(p0, p1, p2, p3) => {
                cubic_length(p0, p1, p2, p3, ARC_LENGTH_TOLERANCE)
            }
        };
    }
    Ok(length)
}

fn cubic_length(p0: Point, p1: Point, p2: Point, p3: Point, tolerance: f64) -> f64 {
    let chord = p0.distance(p3);
    let polygon = p0.distance(p1) + p1.distance(p2) + p2.distance(p3);
    if polygon - chord <= tolerance {
        return (polygon + chord) / 2.0;
    }
    // De Casteljau split at t = 1/2.
    let p01 = p0.midpoint(p1);
    let p12 = p1.midpoint(p2);
    let p23 = p2.midpoint(p3);
    let p012 = p01.midpoint(p12);
    let p123 = p12.midpoint(p23);
    let mid = p012.midpoint(p123);
    cubic_length(p0, p01, p012, mid, tolerance / 2.0)
        + cubic_length(mid, p123, p23, p3, tolerance / 2.0)
}

fn parse_path(d: &str) -> Result<Vec<PathSegment>> {
    let tokens = tokenize_path(d)?;
    let mut segments = Vec::new();
    let mut position = 0;
    let mut current = Point::default();
    let mut start = Point::default();
    let mut command = None;

    let mut take_number = |position: &mut usize| -> Result<f64> {
        match tokens.get(*position) {
            Some(PathToken::Number(value)) => {
                *position += 1;
                Ok(*value)
            }
            _ => bail!("expected a coordinate in the path data"),
        }
    };

    while position < tokens.len() {
        if let PathToken::Command(c) = tokens[position] {
            command = Some(c);
            position += 1;
            if c == 'Z' || c == 'z' {
                segments.push(PathSegment::Line(current, start));
                current = start;
                continue;
            }
        }
        let c = command.ok_or_else(|| anyhow!("path data does not start with a command"))?;
        let relative = c.is_ascii_lowercase();
        let offset = if relative { current } else { Point::default() };
        let mut point = |position: &mut usize| -> Result<Point> {
            let x = take_number(position)? + offset.x;
            let y = take_number(position)? + offset.y;
            Ok(Point { x, y })
        };

        match c.to_ascii_uppercase() {
            'M' => {
                current = point(&mut position)?;
                start = current;
                // Subsequent coordinate pairs are implicit line-tos.
                command = Some(if relative { 'l' } else { 'L' });
            }
            'L' => {
                let to = point(&mut position)?;
                segments.push(PathSegment::Line(current, to));
                current = to;
            }
            'C' => {
                let p1 = point(&mut position)?;
                let p2 = point(&mut position)?;
                let p3 = point(&mut position)?;
                segments.push(PathSegment::Cubic(current, p1, p2, p3));
                current = p3;
            }
            other => bail!("unsupported path command '{other}'"),
        }
    }
    Ok(segments)
}

enum PathToken {
    Command(char),
    Number(f64),
}

fn tokenize_path(d: &str) -> Result<Vec<PathToken>> {
    let bytes = d.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() || c == ',' {
            i += 1;
        } else if c.is_ascii_alphabetic() {
            tokens.push(PathToken::Command(c));
            i += 1;
        } else {
            let begin = i;
            if c == '+' || c == '-' {
                i += 1;
            }
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            // Exponent notation; a bare 'e' stays a command letter.
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                let mut after = i + 1;
                if after < bytes.len() && (bytes[after] == b'+' || bytes[after] == b'-') {
                    after += 1;
                }
                if after < bytes.len() && bytes[after].is_ascii_digit() {
                    i = after;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text = &d[begin..i];
            let value: f64 = text
                .parse()
                .map_err(|_| anyhow!("invalid coordinate '{text}' in the path data"))?;
            tokens.push(PathToken::Number(value));
        }
    }
    Ok(tokens)
}
