//! ISMRMRD XML header serialization.
//!
//! Writing uses `quick_xml::Writer` with fixed element order and no
//! timestamps, so equal headers serialize to identical bytes. Reading builds a
//! small element tree first and maps it onto [`MrdHeader`].

use chrono::NaiveDate;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::error::MrdError;
use super::header::{
    AcquisitionSystem, Encoding, EncodingLimits, EncodingSpace, Limit, MrdHeader,
    SequenceParameters, Trajectory, TrajectoryDescription, UserParameters,
};

const NAMESPACE: &str = "http://www.ismrm.org/ISMRMRD";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Serialize a header to an XML document
pub fn to_xml(header: &MrdHeader) -> Result<String, MrdError> {
    let mut out = XmlOut {
        writer: Writer::new_with_indent(Vec::new(), b' ', 2),
    };

    out.event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    out.event(Event::Start(
        BytesStart::new("ismrmrdHeader").with_attributes([("xmlns", NAMESPACE)]),
    ))?;

    out.text_element("version", &header.version.to_string())?;

    out.start("subjectInformation")?;
    out.text_element("patientID", &header.subject_id)?;
    out.end("subjectInformation")?;

    out.start("studyInformation")?;
    out.text_element("studyDate", &header.study_date.format(DATE_FORMAT).to_string())?;
    if let Some(id) = &header.study_id {
        out.text_element("studyID", id)?;
    }
    out.end("studyInformation")?;

    if let Some(name) = &header.protocol_name {
        out.start("measurementInformation")?;
        out.text_element("protocolName", name)?;
        out.end("measurementInformation")?;
    }

    write_system(&mut out, &header.system)?;

    out.start("experimentalConditions")?;
    out.text_element(
        "H1resonanceFrequency_Hz",
        &header.h1_resonance_frequency_hz.to_string(),
    )?;
    out.end("experimentalConditions")?;

    write_encoding(&mut out, &header.encoding)?;

    if !header.sequence.is_empty() {
        let sequence = &header.sequence;
        out.start("sequenceParameters")?;
        for (name, values) in [
            ("TR", &sequence.tr_ms),
            ("TE", &sequence.te_ms),
            ("flipAngle_deg", &sequence.flip_angle_deg),
        ] {
            for value in values {
                out.text_element(name, &value.to_string())?;
            }
        }
        out.end("sequenceParameters")?;
    }

    if !header.user_parameters.is_empty() {
        let params = &header.user_parameters;
        out.start("userParameters")?;
        for (name, value) in &params.longs {
            out.name_value("userParameterLong", name, &value.to_string())?;
        }
        for (name, value) in &params.doubles {
            out.name_value("userParameterDouble", name, &value.to_string())?;
        }
        for (name, value) in &params.strings {
            out.name_value("userParameterString", name, value)?;
        }
        out.end("userParameters")?;
    }

    out.end("ismrmrdHeader")?;
    String::from_utf8(out.writer.into_inner()).map_err(MrdError::xml)
}

fn write_system(out: &mut XmlOut, system: &AcquisitionSystem) -> Result<(), MrdError> {
    out.start("acquisitionSystemInformation")?;
    if let Some(vendor) = &system.vendor {
        out.text_element("systemVendor", vendor)?;
    }
    if let Some(model) = &system.model {
        out.text_element("systemModel", model)?;
    }
    if let Some(field) = system.field_strength_t {
        out.text_element("systemFieldStrength_T", &field.to_string())?;
    }
    if let Some(channels) = system.receiver_channels {
        out.text_element("receiverChannels", &channels.to_string())?;
    }
    if let Some(institution) = &system.institution {
        out.text_element("institutionName", institution)?;
    }
    out.end("acquisitionSystemInformation")
}

fn write_encoding(out: &mut XmlOut, encoding: &Encoding) -> Result<(), MrdError> {
    out.start("encoding")?;
    write_space(out, "encodedSpace", &encoding.encoded_space)?;
    write_space(out, "reconSpace", &encoding.recon_space)?;

    out.start("encodingLimits")?;
    for (name, limit) in encoding.limits.entries() {
        if let Some(limit) = limit {
            out.start(name)?;
            out.text_element("minimum", &limit.minimum.to_string())?;
            out.text_element("maximum", &limit.maximum.to_string())?;
            out.text_element("center", &limit.center.to_string())?;
            out.end(name)?;
        }
    }
    out.end("encodingLimits")?;

    out.text_element("trajectory", encoding.trajectory.as_str())?;

    if let Some(description) = &encoding.trajectory_description {
        out.start("trajectoryDescription")?;
        out.text_element("identifier", &description.identifier)?;
        for (name, value) in &description.longs {
            out.name_value("userParameterLong", name, &value.to_string())?;
        }
        out.end("trajectoryDescription")?;
    }
    out.end("encoding")
}

fn write_space(out: &mut XmlOut, name: &str, space: &EncodingSpace) -> Result<(), MrdError> {
    out.start(name)?;
    out.start("matrixSize")?;
    for (axis, value) in ["x", "y", "z"].iter().zip(space.matrix) {
        out.text_element(axis, &value.to_string())?;
    }
    out.end("matrixSize")?;
    out.start("fieldOfView_mm")?;
    for (axis, value) in ["x", "y", "z"].iter().zip(space.fov_mm) {
        out.text_element(axis, &value.to_string())?;
    }
    out.end("fieldOfView_mm")?;
    out.end(name)
}

struct XmlOut {
    writer: Writer<Vec<u8>>,
}

impl XmlOut {
    fn event(&mut self, event: Event<'_>) -> Result<(), MrdError> {
        self.writer.write_event(event).map_err(MrdError::xml)
    }

    fn start(&mut self, name: &str) -> Result<(), MrdError> {
        self.event(Event::Start(BytesStart::new(name)))
    }

    fn end(&mut self, name: &str) -> Result<(), MrdError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<(), MrdError> {
        self.start(name)?;
        self.event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    fn name_value(&mut self, element: &str, name: &str, value: &str) -> Result<(), MrdError> {
        self.start(element)?;
        self.text_element("name", name)?;
        self.text_element("value", value)?;
        self.end(element)
    }
}

/// Parsed XML element
#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn text_of(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    fn require(&self, name: &str) -> Result<&Node, MrdError> {
        self.child(name)
            .ok_or_else(|| MrdError::invalid(format!("{}/{}", self.name, name), "missing"))
    }

    fn parse<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, MrdError> {
        match self.text_of(name) {
            None => Ok(None),
            Some(text) => text
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| MrdError::invalid(format!("{}/{}", self.name, name), format!("cannot parse '{text}'"))),
        }
    }

    fn parse_required<T: std::str::FromStr>(&self, name: &str) -> Result<T, MrdError> {
        self.parse(name)?
            .ok_or_else(|| MrdError::invalid(format!("{}/{}", self.name, name), "missing"))
    }
}

fn parse_tree(xml: &str) -> Result<Node, MrdError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = vec![Node::default()];
    loop {
        match reader.read_event().map_err(MrdError::xml)? {
            Event::Start(e) => stack.push(Node {
                name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                ..Node::default()
            }),
            Event::Empty(e) => {
                let node = Node {
                    name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                    ..Node::default()
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(MrdError::xml)?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| MrdError::xml("unbalanced end tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Err(MrdError::xml("unbalanced end tag")),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() != 1 {
        return Err(MrdError::xml("unterminated element"));
    }
    stack
        .pop()
        .and_then(|document| document.children.into_iter().find(|c| c.name == "ismrmrdHeader"))
        .ok_or_else(|| MrdError::invalid("ismrmrdHeader", "missing root element"))
}

/// Parse an XML document into a header
pub fn from_xml(xml: &str) -> Result<MrdHeader, MrdError> {
    let root = parse_tree(xml)?;

    let subject = root.require("subjectInformation")?;
    let study = root.require("studyInformation")?;
    let date_text = study
        .text_of("studyDate")
        .ok_or_else(|| MrdError::invalid("studyInformation/studyDate", "missing"))?;
    let study_date = NaiveDate::parse_from_str(date_text.trim(), DATE_FORMAT)
        .map_err(|e| MrdError::invalid("studyInformation/studyDate", e.to_string()))?;

    let system = match root.child("acquisitionSystemInformation") {
        Some(node) => AcquisitionSystem {
            vendor: node.text_of("systemVendor").map(str::to_string),
            model: node.text_of("systemModel").map(str::to_string),
            field_strength_t: node.parse("systemFieldStrength_T")?,
            receiver_channels: node.parse("receiverChannels")?,
            institution: node.text_of("institutionName").map(str::to_string),
        },
        None => AcquisitionSystem::default(),
    };

    let sequence = match root.child("sequenceParameters") {
        Some(node) => SequenceParameters {
            tr_ms: parse_all(node, "TR")?,
            te_ms: parse_all(node, "TE")?,
            flip_angle_deg: parse_all(node, "flipAngle_deg")?,
        },
        None => SequenceParameters::default(),
    };

    let mut user_parameters = UserParameters::default();
    if let Some(node) = root.child("userParameters") {
        user_parameters.longs = name_values(node, "userParameterLong")?;
        user_parameters.doubles = name_values(node, "userParameterDouble")?;
        user_parameters.strings = name_values(node, "userParameterString")?;
    }

    Ok(MrdHeader {
        version: root.parse_required("version")?,
        subject_id: subject.text_of("patientID").unwrap_or_default().to_string(),
        study_date,
        study_id: study.text_of("studyID").map(str::to_string),
        protocol_name: root
            .child("measurementInformation")
            .and_then(|m| m.text_of("protocolName"))
            .map(str::to_string),
        system,
        h1_resonance_frequency_hz: root
            .require("experimentalConditions")?
            .parse_required("H1resonanceFrequency_Hz")?,
        encoding: read_encoding(root.require("encoding")?)?,
        sequence,
        user_parameters,
    })
}

fn read_encoding(node: &Node) -> Result<Encoding, MrdError> {
    let mut limits = EncodingLimits::default();
    if let Some(limits_node) = node.child("encodingLimits") {
        for child in &limits_node.children {
            let limit = Limit {
                minimum: child.parse_required("minimum")?,
                maximum: child.parse_required("maximum")?,
                center: child.parse_required("center")?,
            };
            if let Some(slot) = limits.entry_mut(&child.name) {
                *slot = Some(limit);
            }
        }
    }

    let trajectory = node
        .text_of("trajectory")
        .ok_or_else(|| MrdError::invalid("encoding/trajectory", "missing"))?
        .parse::<Trajectory>()
        .map_err(|e| MrdError::invalid("encoding/trajectory", e))?;

    let trajectory_description = match node.child("trajectoryDescription") {
        Some(desc) => Some(TrajectoryDescription {
            identifier: desc.text_of("identifier").unwrap_or_default().to_string(),
            longs: name_values(desc, "userParameterLong")?,
        }),
        None => None,
    };

    Ok(Encoding {
        encoded_space: read_space(node.require("encodedSpace")?)?,
        recon_space: read_space(node.require("reconSpace")?)?,
        limits,
        trajectory,
        trajectory_description,
    })
}

fn read_space(node: &Node) -> Result<EncodingSpace, MrdError> {
    let matrix = node.require("matrixSize")?;
    let fov = node.require("fieldOfView_mm")?;
    Ok(EncodingSpace {
        matrix: [
            matrix.parse_required("x")?,
            matrix.parse_required("y")?,
            matrix.parse_required("z")?,
        ],
        fov_mm: [
            fov.parse_required("x")?,
            fov.parse_required("y")?,
            fov.parse_required("z")?,
        ],
    })
}

fn parse_all(node: &Node, name: &str) -> Result<Vec<f64>, MrdError> {
    node.children(name)
        .map(|c| {
            c.text
                .trim()
                .parse()
                .map_err(|_| MrdError::invalid(name, format!("cannot parse '{}'", c.text)))
        })
        .collect()
}

fn name_values<T: std::str::FromStr>(node: &Node, element: &str) -> Result<Vec<(String, T)>, MrdError> {
    node.children(element)
        .map(|c| {
            let name = c.text_of("name").unwrap_or_default().to_string();
            let value = c.parse_required("value")?;
            Ok((name, value))
        })
        .collect()
}
