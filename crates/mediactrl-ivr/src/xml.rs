//! IVR CONTROL body parsing/serialization (`application/msc-ivr+xml`,
//! §4.8). Walked with `quick_xml`'s pull-event reader the same way
//! `mediactrl-mixer::xml` does, generalized to the deeper `<dialog>` tree
//! (nested `<par>`/`<seq>`/`<media>`/`<variable>`, `<collect>`'s
//! `<grammar>`, `<control>`'s VCR key bindings, `<record>`).

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{self, IvrStatus};
use crate::grammar::{Grammar, GrammarItem, Rule};

pub type ParseError = (IvrStatus, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndSync {
    First,
    Last,
}

#[derive(Debug, Clone)]
pub struct MediaItem {
    pub loc: String,
    pub clip_begin_ms: Option<u64>,
    pub clip_end_ms: Option<u64>,
    pub sound_level: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct VariableItem {
    pub var_type: String,
    pub format: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone)]
pub enum PromptNode {
    Seq(Vec<PromptNode>),
    Par(Vec<PromptNode>, EndSync),
    Media(MediaItem),
    Variable(VariableItem),
}

#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub bargein: bool,
    pub root: PromptNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VcrKey {
    Start,
    End,
    FastForward,
    Rewind,
    Pause,
    Resume,
    VolumeUp,
    VolumeDown,
    SpeedUp,
    SpeedDown,
}

impl VcrKey {
    fn from_action(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "end" => Some(Self::End),
            "ff" => Some(Self::FastForward),
            "rw" => Some(Self::Rewind),
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "volup" => Some(Self::VolumeUp),
            "voldown" => Some(Self::VolumeDown),
            "speedup" => Some(Self::SpeedUp),
            "speeddown" => Some(Self::SpeedDown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ControlSpec {
    pub keys: HashMap<char, VcrKey>,
}

#[derive(Debug, Clone)]
pub struct CollectSpec {
    pub timeout_ms: u64,
    pub interdigit_ms: u64,
    pub termtimeout_ms: u64,
    pub maxdigits: u32,
    pub escapekey: Option<char>,
    pub termchar: Option<char>,
    pub cleardigitbuffer: bool,
    pub grammar: Option<Grammar>,
}

impl Default for CollectSpec {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            interdigit_ms: 2000,
            termtimeout_ms: 0,
            maxdigits: 1,
            escapekey: None,
            termchar: Some('#'),
            cleardigitbuffer: false,
            grammar: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordSpec {
    pub timeout_ms: u64,
    pub maxtime_ms: u64,
    pub finalsilence_ms: u64,
    pub vadinitial: bool,
    pub vadfinal: bool,
    pub dtmfterm: bool,
    pub beep: bool,
    pub append: bool,
    pub dest: Option<String>,
}

impl Default for RecordSpec {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            maxtime_ms: 30_000,
            finalsilence_ms: 2000,
            vadinitial: false,
            vadfinal: false,
            dtmfterm: true,
            beep: false,
            append: false,
            dest: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtmfMatchMode {
    All,
    Collect,
    Control,
}

#[derive(Debug, Clone, Copy)]
pub struct DtmfSubscription {
    pub matchmode: DtmfMatchMode,
}

#[derive(Debug, Clone, Default)]
pub struct DialogSpec {
    pub prompt: Option<PromptSpec>,
    pub collect: Option<CollectSpec>,
    pub control: Option<ControlSpec>,
    pub record: Option<RecordSpec>,
    pub subscribe_dtmf: Option<DtmfSubscription>,
}

#[derive(Debug, Clone)]
pub enum IvrRequest {
    DialogPrepare {
        id: Option<String>,
        spec: DialogSpec,
    },
    DialogStart {
        id: Option<String>,
        connection_id: Option<String>,
        conference_id: Option<String>,
        spec: Option<DialogSpec>,
    },
    DialogTerminate {
        id: String,
        immediate: bool,
    },
    Audit {
        dialog: Option<String>,
    },
}

fn xml_err(e: quick_xml::Error) -> ParseError {
    (error::SYNTAX_ERROR, format!("XML parse error: {e}"))
}

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

fn attr_value(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == name.as_bytes() {
            Some(String::from_utf8_lossy(&a.value).to_string())
        } else {
            None
        }
    })
}

fn attr_bool(e: &BytesStart, name: &str) -> Option<bool> {
    attr_value(e, name).map(|v| v == "true" || v == "1")
}

fn parse_duration_ms(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(sec) = s.strip_suffix('s') {
        sec.parse::<f64>().ok().map(|v| (v * 1000.0) as u64)
    } else if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok()
    } else {
        s.parse::<u64>().ok()
    }
}

fn parse_clip_time(s: &str) -> Option<u64> {
    let s = s.trim();
    let s = s.strip_prefix("npt:").unwrap_or(s);
    parse_duration_ms(s)
}

/// Skips the remainder of an element's subtree (used for unrecognized
/// foreign elements and elements this parser doesn't model in depth).
fn skip_to_end(reader: &mut Reader<&[u8]>, tag: &str) -> Result<(), ParseError> {
    let mut depth = 1i32;
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if tag_name(&e) == tag => depth += 1,
            Event::End(e) if tag_name(&e) == tag => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Event::Eof => return Err((error::SYNTAX_ERROR, format!("unexpected eof inside <{tag}>"))),
            _ => {}
        }
    }
}

fn parse_media_attrs(e: &BytesStart) -> Result<MediaItem, ParseError> {
    let loc = attr_value(e, "loc").ok_or((error::SYNTAX_ERROR, "media element missing loc".to_string()))?;
    let clip_begin_ms = attr_value(e, "clipBegin").and_then(|v| parse_clip_time(&v));
    let clip_end_ms = attr_value(e, "clipEnd").and_then(|v| parse_clip_time(&v));
    if let (Some(begin), Some(end)) = (clip_begin_ms, clip_end_ms) {
        if begin > 0 && end > 0 && begin >= end {
            return Err((error::SYNTAX_ERROR, "clipBegin >= clipEnd".to_string()));
        }
    }
    let sound_level = attr_value(e, "soundLevel").and_then(|v| v.parse().ok());
    Ok(MediaItem {
        loc,
        clip_begin_ms,
        clip_end_ms,
        sound_level,
    })
}

fn parse_variable_attrs(e: &BytesStart) -> Result<VariableItem, ParseError> {
    let var_type = attr_value(e, "type").ok_or((error::SYNTAX_ERROR, "variable element missing type".to_string()))?;
    let format = attr_value(e, "format");
    let value = attr_value(e, "value").ok_or((error::SYNTAX_ERROR, "variable element missing value".to_string()))?;
    Ok(VariableItem { var_type, format, value })
}

fn parse_endsync(e: &BytesStart) -> EndSync {
    match attr_value(e, "endsync").as_deref() {
        Some("first") => EndSync::First,
        _ => EndSync::Last,
    }
}

/// Parses the immediate children of a `<prompt>`, `<seq>` or `<par>`
/// element into a flat list, recursing into nested containers.
fn parse_prompt_children(reader: &mut Reader<&[u8]>, closing_tag: &str) -> Result<Vec<PromptNode>, ParseError> {
    let mut children = Vec::new();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                let name = tag_name(&e);
                match name.as_str() {
                    "seq" => children.push(PromptNode::Seq(parse_prompt_children(reader, "seq")?)),
                    "par" => {
                        let endsync = parse_endsync(&e);
                        children.push(PromptNode::Par(parse_prompt_children(reader, "par")?, endsync));
                    }
                    "media" => {
                        let item = parse_media_attrs(&e)?;
                        skip_to_end(reader, "media")?;
                        children.push(PromptNode::Media(item));
                    }
                    "variable" => {
                        let item = parse_variable_attrs(&e)?;
                        skip_to_end(reader, "variable")?;
                        children.push(PromptNode::Variable(item));
                    }
                    "dtmf" => {
                        // DTMF tone synthesis within a prompt is not implemented.
                        return Err((error::UNSUPPORTED_DTMF_CONFIG, "dtmf synthesis is not supported".to_string()));
                    }
                    other => skip_to_end(reader, other)?,
                }
            }
            Event::Empty(e) => {
                let name = tag_name(&e);
                match name.as_str() {
                    "media" => children.push(PromptNode::Media(parse_media_attrs(&e)?)),
                    "variable" => children.push(PromptNode::Variable(parse_variable_attrs(&e)?)),
                    "par" => children.push(PromptNode::Par(Vec::new(), parse_endsync(&e))),
                    "seq" => children.push(PromptNode::Seq(Vec::new())),
                    "dtmf" => return Err((error::UNSUPPORTED_DTMF_CONFIG, "dtmf synthesis is not supported".to_string())),
                    _ => {}
                }
            }
            Event::End(e) if tag_name(&e) == closing_tag => break,
            Event::Eof => return Err((error::SYNTAX_ERROR, "unexpected eof in prompt".to_string())),
            _ => {}
        }
    }
    Ok(children)
}

fn parse_prompt(reader: &mut Reader<&[u8]>, e: &BytesStart) -> Result<PromptSpec, ParseError> {
    let bargein = attr_bool(e, "bargein").unwrap_or(false);
    let root = PromptNode::Seq(parse_prompt_children(reader, "prompt")?);
    Ok(PromptSpec { bargein, root })
}

fn parse_repeat_attr(e: &BytesStart) -> (u32, u32) {
    match attr_value(e, "repeat") {
        None => (1, 1),
        Some(s) => {
            if let Some((a, b)) = s.split_once('-') {
                let min: u32 = a.parse().unwrap_or(0);
                let max = if b.is_empty() { min.saturating_add(10) } else { b.parse().unwrap_or(min) };
                (min, max)
            } else {
                let n: u32 = s.parse().unwrap_or(1);
                (n, n)
            }
        }
    }
}

fn parse_grammar_node(reader: &mut Reader<&[u8]>, closing_tag: &str) -> Result<GrammarItem, ParseError> {
    let mut parts: Vec<GrammarItem> = Vec::new();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Text(t) => {
                let text = t.unescape().map_err(xml_err)?.to_string();
                let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                if !digits.is_empty() {
                    parts.push(GrammarItem::Literal(digits));
                }
            }
            Event::Start(e) => {
                let name = tag_name(&e);
                match name.as_str() {
                    "one-of" => parts.push(GrammarItem::OneOf(parse_one_of(reader)?)),
                    "item" => {
                        let (min, max) = parse_repeat_attr(&e);
                        let inner = parse_grammar_node(reader, "item")?;
                        parts.push(if min == 1 && max == 1 {
                            inner
                        } else {
                            GrammarItem::Repeat {
                                item: Box::new(inner),
                                min,
                                max,
                            }
                        });
                    }
                    "ruleref" => {
                        let uri = attr_value(&e, "uri").unwrap_or_default();
                        skip_to_end(reader, "ruleref")?;
                        parts.push(GrammarItem::Ruleref(uri.trim_start_matches('#').to_string()));
                    }
                    other => skip_to_end(reader, other)?,
                }
            }
            Event::Empty(e) if tag_name(&e) == "ruleref" => {
                let uri = attr_value(&e, "uri").unwrap_or_default();
                parts.push(GrammarItem::Ruleref(uri.trim_start_matches('#').to_string()));
            }
            Event::End(e) if tag_name(&e) == closing_tag => break,
            Event::Eof => return Err((error::SYNTAX_ERROR, "unexpected eof in grammar".to_string())),
            _ => {}
        }
    }
    Ok(if parts.len() == 1 {
        parts.into_iter().next().unwrap()
    } else {
        GrammarItem::Sequence(parts)
    })
}

fn parse_one_of(reader: &mut Reader<&[u8]>) -> Result<Vec<GrammarItem>, ParseError> {
    let mut alts = Vec::new();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if tag_name(&e) == "item" => {
                let (min, max) = parse_repeat_attr(&e);
                let inner = parse_grammar_node(reader, "item")?;
                alts.push(if min == 1 && max == 1 {
                    inner
                } else {
                    GrammarItem::Repeat {
                        item: Box::new(inner),
                        min,
                        max,
                    }
                });
            }
            Event::End(e) if tag_name(&e) == "one-of" => break,
            Event::Eof => return Err((error::SYNTAX_ERROR, "unexpected eof in one-of".to_string())),
            _ => {}
        }
    }
    Ok(alts)
}

fn parse_grammar(reader: &mut Reader<&[u8]>, e: &BytesStart) -> Result<Grammar, ParseError> {
    if let Some(mode) = attr_value(e, "mode") {
        if mode != "dtmf" {
            return Err((error::UNSUPPORTED_GRAMMAR_FORMAT, format!("unsupported grammar mode {mode}")));
        }
    }
    let root = attr_value(e, "root").unwrap_or_else(|| "root".to_string());
    let mut rules = HashMap::new();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(re) if tag_name(&re) == "rule" => {
                let id = attr_value(&re, "id").ok_or((error::SYNTAX_ERROR, "rule missing id".to_string()))?;
                let body = parse_grammar_node(reader, "rule")?;
                rules.insert(id.clone(), Rule { id, body });
            }
            Event::End(ge) if tag_name(&ge) == "grammar" => break,
            Event::Eof => return Err((error::SYNTAX_ERROR, "unexpected eof in grammar".to_string())),
            _ => {}
        }
    }
    if !rules.contains_key(&root) {
        return Err((error::UNSUPPORTED_GRAMMAR_FORMAT, format!("grammar root rule {root} not defined")));
    }
    Ok(Grammar { rules, root })
}

fn parse_collect(reader: &mut Reader<&[u8]>, e: &BytesStart, has_body: bool) -> Result<CollectSpec, ParseError> {
    let mut spec = CollectSpec {
        timeout_ms: attr_value(e, "timeout").and_then(|v| parse_duration_ms(&v)).unwrap_or(5000),
        interdigit_ms: attr_value(e, "interdigittimeout").and_then(|v| parse_duration_ms(&v)).unwrap_or(2000),
        termtimeout_ms: attr_value(e, "termtimeout").and_then(|v| parse_duration_ms(&v)).unwrap_or(0),
        maxdigits: attr_value(e, "maxdigits").and_then(|v| v.parse().ok()).unwrap_or(1),
        escapekey: attr_value(e, "escapekey").and_then(|v| v.chars().next()),
        termchar: attr_value(e, "termchar").map(|v| v.chars().next()).unwrap_or(Some('#')),
        cleardigitbuffer: attr_bool(e, "cleardigitbuffer").unwrap_or(false),
        grammar: None,
    };
    if !has_body {
        return Ok(spec);
    }
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(ge) if tag_name(&ge) == "grammar" => {
                spec.grammar = Some(parse_grammar(reader, &ge)?);
            }
            Event::End(ce) if tag_name(&ce) == "collect" => break,
            Event::Eof => return Err((error::SYNTAX_ERROR, "unexpected eof in collect".to_string())),
            _ => {}
        }
    }
    Ok(spec)
}

fn parse_control(reader: &mut Reader<&[u8]>, has_body: bool) -> Result<ControlSpec, ParseError> {
    let mut spec = ControlSpec::default();
    if !has_body {
        return Ok(spec);
    }
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Empty(e) if tag_name(&e) == "vcrkey" => {
                let action = attr_value(&e, "action").unwrap_or_default();
                let digits = attr_value(&e, "digits").unwrap_or_default();
                let Some(key) = VcrKey::from_action(&action) else {
                    return Err((error::UNSUPPORTED_PARAMETER, format!("unknown vcr action {action}")));
                };
                for c in digits.chars() {
                    if spec.keys.contains_key(&c) {
                        return Err((error::DUPLICATE_CONTROL_KEYS, format!("digit {c} bound twice")));
                    }
                    spec.keys.insert(c, key);
                }
            }
            Event::End(e) if tag_name(&e) == "control" => break,
            Event::Eof => return Err((error::SYNTAX_ERROR, "unexpected eof in control".to_string())),
            _ => {}
        }
    }
    Ok(spec)
}

fn parse_record(e: &BytesStart) -> RecordSpec {
    RecordSpec {
        timeout_ms: attr_value(e, "timeout").and_then(|v| parse_duration_ms(&v)).unwrap_or(5000),
        maxtime_ms: attr_value(e, "maxtime").and_then(|v| parse_duration_ms(&v)).unwrap_or(30_000),
        finalsilence_ms: attr_value(e, "finalsilence").and_then(|v| parse_duration_ms(&v)).unwrap_or(2000),
        vadinitial: attr_bool(e, "vadinitial").unwrap_or(false),
        vadfinal: attr_bool(e, "vadfinal").unwrap_or(false),
        dtmfterm: attr_bool(e, "dtmfterm").unwrap_or(true),
        beep: attr_bool(e, "beep").unwrap_or(false),
        append: attr_bool(e, "append").unwrap_or(false),
        dest: attr_value(e, "dest"),
    }
}

fn parse_subscribe(reader: &mut Reader<&[u8]>) -> Result<Option<DtmfSubscription>, ParseError> {
    let mut sub = None;
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Empty(e) | Event::Start(e) if tag_name(&e) == "dtmfsub" => {
                let matchmode = match attr_value(&e, "matchmode").as_deref() {
                    Some("collect") => DtmfMatchMode::Collect,
                    Some("control") => DtmfMatchMode::Control,
                    _ => DtmfMatchMode::All,
                };
                sub = Some(DtmfSubscription { matchmode });
            }
            Event::End(e) if tag_name(&e) == "subscribe" => break,
            Event::Eof => return Err((error::SYNTAX_ERROR, "unexpected eof in subscribe".to_string())),
            _ => {}
        }
    }
    Ok(sub)
}

/// Parses the children of a `<dialog>` element (already past its opening
/// tag) into a [`DialogSpec`].
pub fn parse_dialog_spec(reader: &mut Reader<&[u8]>) -> Result<DialogSpec, ParseError> {
    let mut spec = DialogSpec::default();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                let name = tag_name(&e);
                match name.as_str() {
                    "prompt" => spec.prompt = Some(parse_prompt(reader, &e)?),
                    "collect" => spec.collect = Some(parse_collect(reader, &e, true)?),
                    "control" => spec.control = Some(parse_control(reader, true)?),
                    "record" => { /* record is normally self-closing; handle Start defensively */ }
                    "subscribe" => spec.subscribe_dtmf = parse_subscribe(reader)?,
                    other => skip_to_end(reader, other)?,
                }
            }
            Event::Empty(e) => {
                let name = tag_name(&e);
                match name.as_str() {
                    "prompt" => {
                        spec.prompt = Some(PromptSpec {
                            bargein: attr_bool(&e, "bargein").unwrap_or(false),
                            root: PromptNode::Seq(Vec::new()),
                        })
                    }
                    "collect" => spec.collect = Some(parse_collect(reader, &e, false)?),
                    "control" => spec.control = Some(parse_control(reader, false)?),
                    "record" => spec.record = Some(parse_record(&e)),
                    _ => {}
                }
            }
            Event::End(e) if tag_name(&e) == "dialog" => break,
            Event::Eof => return Err((error::SYNTAX_ERROR, "unexpected eof in dialog".to_string())),
            _ => {}
        }
    }

    if spec.control.is_some() && spec.prompt.is_none() {
        return Err((error::UNSUPPORTED_PARAMETER, "control requires a prompt".to_string()));
    }
    if spec.collect.is_some() && spec.record.is_some() {
        return Err((error::UNSUPPORTED_COLLECT_AND_RECORD, "collect and record cannot coexist".to_string()));
    }
    Ok(spec)
}

fn parse_dialog_prepare(reader: &mut Reader<&[u8]>, e: &BytesStart) -> Result<IvrRequest, ParseError> {
    let id = attr_value(e, "dialogid");
    let mut spec = None;
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(de) if tag_name(&de) == "dialog" => spec = Some(parse_dialog_spec(reader)?),
            Event::End(de) if tag_name(&de) == "dialogprepare" => break,
            Event::Eof => return Err((error::SYNTAX_ERROR, "unexpected eof".to_string())),
            _ => {}
        }
    }
    Ok(IvrRequest::DialogPrepare {
        id,
        spec: spec.unwrap_or_default(),
    })
}

fn parse_dialog_start(reader: &mut Reader<&[u8]>, e: &BytesStart) -> Result<IvrRequest, ParseError> {
    let id = attr_value(e, "dialogid");
    let connection_id = attr_value(e, "connectionid");
    let conference_id = attr_value(e, "conferenceid");
    let mut spec = None;
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(de) if tag_name(&de) == "dialog" => spec = Some(parse_dialog_spec(reader)?),
            Event::End(de) if tag_name(&de) == "dialogstart" => break,
            Event::Eof => return Err((error::SYNTAX_ERROR, "unexpected eof".to_string())),
            _ => {}
        }
    }
    Ok(IvrRequest::DialogStart {
        id,
        connection_id,
        conference_id,
        spec,
    })
}

fn parse_dialog_terminate(e: &BytesStart) -> Result<IvrRequest, ParseError> {
    let id = attr_value(e, "dialogid").ok_or((error::SYNTAX_ERROR, "dialogterminate missing dialogid".to_string()))?;
    let immediate = attr_bool(e, "immediate").unwrap_or(false);
    Ok(IvrRequest::DialogTerminate { id, immediate })
}

pub fn parse_request(body: &[u8]) -> Result<IvrRequest, ParseError> {
    let text = std::str::from_utf8(body).map_err(|_| (error::SYNTAX_ERROR, "body is not UTF-8".to_string()))?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut saw_root = false;
    let mut request: Option<IvrRequest> = None;

    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Eof => break,
            Event::Start(e) if !saw_root => {
                if tag_name(&e) != "mscivr" {
                    return Err((error::SYNTAX_ERROR, "root element must be mscivr".to_string()));
                }
                saw_root = true;
            }
            Event::Empty(e) if !saw_root => {
                if tag_name(&e) != "mscivr" {
                    return Err((error::SYNTAX_ERROR, "root element must be mscivr".to_string()));
                }
                saw_root = true;
            }
            Event::Start(e) if request.is_none() => {
                let name = tag_name(&e);
                request = Some(match name.as_str() {
                    "dialogprepare" => parse_dialog_prepare(&mut reader, &e)?,
                    "dialogstart" => parse_dialog_start(&mut reader, &e)?,
                    "dialogterminate" => {
                        let r = parse_dialog_terminate(&e)?;
                        skip_to_end(&mut reader, "dialogterminate")?;
                        r
                    }
                    "audit" => {
                        let r = IvrRequest::Audit { dialog: attr_value(&e, "dialogid") };
                        skip_to_end(&mut reader, "audit")?;
                        r
                    }
                    other => return Err((error::SYNTAX_ERROR, format!("unknown operation {other}"))),
                });
            }
            Event::Empty(e) if request.is_none() => {
                let name = tag_name(&e);
                request = Some(match name.as_str() {
                    "dialogterminate" => parse_dialog_terminate(&e)?,
                    "audit" => IvrRequest::Audit { dialog: attr_value(&e, "dialogid") },
                    "dialogstart" => IvrRequest::DialogStart {
                        id: attr_value(&e, "dialogid"),
                        connection_id: attr_value(&e, "connectionid"),
                        conference_id: attr_value(&e, "conferenceid"),
                        spec: None,
                    },
                    other => return Err((error::SYNTAX_ERROR, format!("{other} requires a body"))),
                });
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err((error::SYNTAX_ERROR, "missing mscivr root".to_string()));
    }
    request.ok_or((error::SYNTAX_ERROR, "missing operation element".to_string()))
}

pub fn build_response(status: IvrStatus, extra_attrs: &[(&str, &str)]) -> Vec<u8> {
    let mut body = String::new();
    body.push_str(r#"<mscivr version="1.0" xmlns="urn:ietf:params:xml:ns:msc-ivr">"#);
    body.push_str(&format!(r#"<response status="{status}" reason="{}""#, xml_escape(error::reason_for(status))));
    for (k, v) in extra_attrs {
        body.push_str(&format!(r#" {k}="{}""#, xml_escape(v)));
    }
    body.push_str("/></mscivr>");
    body.into_bytes()
}

/// Builds a `<dialogexit>` event body, optionally wrapping pre-rendered
/// `<promptinfo>`/`<collectinfo>`/`<controlinfo>`/`<recordinfo>` fragments.
pub fn build_dialog_exit(dialog_id: &str, status: u16, reason: &str, info_fragments: &[String]) -> Vec<u8> {
    let mut body = format!(
        r#"<mscivr version="1.0" xmlns="urn:ietf:params:xml:ns:msc-ivr"><event dialogid="{}">"#,
        xml_escape(dialog_id)
    );
    if info_fragments.is_empty() {
        body.push_str(&format!(r#"<dialogexit status="{status}" reason="{}"/>"#, xml_escape(reason)));
    } else {
        body.push_str(&format!(r#"<dialogexit status="{status}" reason="{}">"#, xml_escape(reason)));
        for fragment in info_fragments {
            body.push_str(fragment);
        }
        body.push_str("</dialogexit>");
    }
    body.push_str("</event></mscivr>");
    body.into_bytes()
}

pub fn build_dtmf_notify(dialog_id: &str, digit: char) -> Vec<u8> {
    format!(
        r#"<mscivr version="1.0" xmlns="urn:ietf:params:xml:ns:msc-ivr"><event dialogid="{}"><dtmfnotify dtmf="{}"/></event></mscivr>"#,
        xml_escape(dialog_id),
        digit
    )
    .into_bytes()
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dialogprepare_with_prompt_and_media() {
        let body = br#"<mscivr version="1.0"><dialogprepare dialogid="d1"><dialog><prompt bargein="true"><media loc="http://x/a.ulaw"/></prompt></dialog></dialogprepare></mscivr>"#;
        match parse_request(body).unwrap() {
            IvrRequest::DialogPrepare { id, spec } => {
                assert_eq!(id.as_deref(), Some("d1"));
                let prompt = spec.prompt.unwrap();
                assert!(prompt.bargein);
                match prompt.root {
                    PromptNode::Seq(children) => assert_eq!(children.len(), 1),
                    _ => panic!("expected Seq root"),
                }
            }
            _ => panic!("expected DialogPrepare"),
        }
    }

    #[test]
    fn rejects_collect_and_record_together() {
        let body = br#"<mscivr version="1.0"><dialogprepare dialogid="d1"><dialog><collect maxdigits="1"/><record timeout="5s"/></dialog></dialogprepare></mscivr>"#;
        let err = parse_request(body).unwrap_err();
        assert_eq!(err.0, error::UNSUPPORTED_COLLECT_AND_RECORD);
    }

    #[test]
    fn parses_collect_with_dtmf_grammar() {
        let body = br#"<mscivr version="1.0"><dialogprepare dialogid="d1"><dialog><collect maxdigits="4"><grammar mode="dtmf" root="main"><rule id="main"><one-of><item>1</item><item>22</item></one-of></rule></grammar></collect></dialog></dialogprepare></mscivr>"#;
        match parse_request(body).unwrap() {
            IvrRequest::DialogPrepare { spec, .. } => {
                let collect = spec.collect.unwrap();
                let grammar = collect.grammar.unwrap();
                assert_eq!(crate::grammar::match_digits(&grammar, "1"), crate::grammar::MatchOutcome::Match);
            }
            _ => panic!("expected DialogPrepare"),
        }
    }

    #[test]
    fn parses_dialogstart_with_connectionid() {
        let body = br#"<mscivr version="1.0"><dialogstart dialogid="d1" connectionid="c1"/></mscivr>"#;
        match parse_request(body).unwrap() {
            IvrRequest::DialogStart { id, connection_id, .. } => {
                assert_eq!(id.as_deref(), Some("d1"));
                assert_eq!(connection_id.as_deref(), Some("c1"));
            }
            _ => panic!("expected DialogStart"),
        }
    }

    #[test]
    fn clip_begin_after_end_is_syntax_error() {
        let body = br#"<mscivr version="1.0"><dialogprepare dialogid="d1"><dialog><prompt><media loc="a" clipBegin="5s" clipEnd="2s"/></prompt></dialog></dialogprepare></mscivr>"#;
        let err = parse_request(body).unwrap_err();
        assert_eq!(err.0, error::SYNTAX_ERROR);
    }
}
