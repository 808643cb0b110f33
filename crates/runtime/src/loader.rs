//! Story JSON loader
//!
//! Materializes the compiled `{inkVersion, root, listDefs}` JSON into the
//! container arena. Containers arrive as `[...contents, meta|null]`; node
//! tokens map one-to-one onto the node taxonomy.

use std::io::Read;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::list::{ListDefs, ListItem, ListValue};
use crate::tree::{ChoiceFlags, ContainerFlags, ContainerId, Node, Story, StoryBuilder};
use crate::value::{BinaryOp, UnaryOp, Value};

/// Story format versions this runtime executes.
pub const SUPPORTED_VERSIONS: std::ops::RangeInclusive<i64> = 19..=21;

#[derive(Deserialize)]
struct StoryFile {
    #[serde(rename = "inkVersion")]
    ink_version: i64,
    root: Json,
    #[serde(rename = "listDefs", default)]
    list_defs: Option<IndexMap<String, IndexMap<String, i64>>>,
}

/// Load a story from a JSON reader.
pub fn load(reader: impl Read) -> Result<Story> {
    load_file(serde_json::from_reader(reader)?)
}

/// Load a story from a JSON string.
pub fn load_str(s: &str) -> Result<Story> {
    load_file(serde_json::from_str(s)?)
}

fn load_file(file: StoryFile) -> Result<Story> {
    if !SUPPORTED_VERSIONS.contains(&file.ink_version) {
        return Err(Error::UnsupportedVersion(file.ink_version));
    }
    let items = match &file.root {
        Json::Array(items) => items,
        other => {
            return Err(Error::MalformedNode(format!(
                "root container must be an array, got {other}"
            )))
        }
    };
    let mut builder = StoryBuilder::new();
    let root = load_container(&mut builder, items, None, None)?;
    let defs = ListDefs::new(file.list_defs.unwrap_or_default());
    debug!(version = file.ink_version, "story loaded");
    Ok(builder.build(root, defs))
}

/// A container is `[...contents, meta|null]`; meta keys are `#n` (name),
/// `#f` (flags), and nested containers under any other key.
fn load_container(
    builder: &mut StoryBuilder,
    items: &[Json],
    parent: Option<ContainerId>,
    parent_index: Option<usize>,
) -> Result<ContainerId> {
    let id = builder.reserve(parent, parent_index);
    let (meta, contents) = items
        .split_last()
        .ok_or_else(|| Error::MalformedNode("empty container array".to_string()))?;
    if let Json::Object(meta) = meta {
        for (key, value) in meta {
            match key.as_str() {
                "#n" => {
                    builder.container_mut(id).name = Some(json_str(value)?.to_string());
                }
                "#f" => {
                    let flags = value.as_f64().ok_or_else(|| {
                        Error::MalformedNode(format!("container flags must be numeric: {value}"))
                    })?;
                    builder.container_mut(id).flags = ContainerFlags(flags as u32);
                }
                name => {
                    let nested_items = value.as_array().ok_or_else(|| {
                        Error::MalformedNode(format!("nested container {name:?} must be an array"))
                    })?;
                    let child = load_container(builder, nested_items, Some(id), None)?;
                    builder.container_mut(child).name = Some(name.to_string());
                    builder.container_mut(id).nested.insert(name.to_string(), child);
                }
            }
        }
    }
    let mut nodes = Vec::with_capacity(contents.len());
    for (index, item) in contents.iter().enumerate() {
        nodes.push(load_node(builder, item, id, index)?);
    }
    builder.container_mut(id).contents = nodes;
    Ok(id)
}

fn load_node(
    builder: &mut StoryBuilder,
    json: &Json,
    parent: ContainerId,
    index: usize,
) -> Result<Node> {
    match json {
        Json::Number(n) => {
            if n.is_i64() {
                Ok(Node::int(n.as_i64().unwrap_or_default()))
            } else {
                Ok(Node::float(n.as_f64().ok_or_else(|| {
                    Error::MalformedNode(format!("unrepresentable number {n}"))
                })?))
            }
        }
        Json::Bool(v) => Ok(Node::Literal(Value::Bool(*v))),
        Json::String(s) => load_token(s),
        Json::Object(map) => load_compound(map),
        Json::Array(items) => {
            let child = load_container(builder, items, Some(parent), Some(index))?;
            Ok(Node::Container(child))
        }
        Json::Null => Err(Error::MalformedNode(
            "null is only valid as container meta".to_string(),
        )),
    }
}

fn load_token(token: &str) -> Result<Node> {
    if let Some(text) = token.strip_prefix('^') {
        return Ok(Node::Text(text.to_string()));
    }
    Ok(match token {
        "\n" => Node::Newline,
        "<>" | "G<" | "G>" => Node::Glue,
        "done" => Node::Done,
        "end" => Node::End,
        "ev" => Node::BeginEval,
        "/ev" => Node::EndEval,
        "str" => Node::BeginStringEval,
        "/str" => Node::EndStringEval,
        "#" => Node::BeginTag,
        "/#" => Node::EndTag,
        "out" => Node::Out,
        "pop" => Node::Pop,
        "du" => Node::DupTop,
        "nop" => Node::NoOp,
        "void" => Node::Void,
        "turn" => Node::TurnCounter,
        "turns" => Node::TurnsSince,
        "visit" => Node::VisitIndex,
        "readc" => Node::ReadCount,
        "choiceCnt" => Node::ChoiceCount,
        "~ret" => Node::FuncReturn,
        "->->" => Node::TunnelReturn,
        "thread" => Node::ThreadStart,
        "seq" => Node::Seq,
        "rnd" => Node::Random,
        "srnd" => Node::SeedRandom,
        "listInt" => Node::ListInt,
        "LIST_VALUE" => Node::ListValueOf,
        "LIST_COUNT" => Node::ListCount,
        "LIST_MIN" => Node::ListMin,
        "LIST_MAX" => Node::ListMax,
        "LIST_ALL" => Node::ListAll,
        "LIST_INVERT" => Node::ListInvert,
        "L^" => Node::ListIntersect,
        "range" => Node::ListRange,
        "+" => Node::Binary(BinaryOp::Add),
        "-" => Node::Binary(BinaryOp::Sub),
        "*" => Node::Binary(BinaryOp::Mul),
        "/" => Node::Binary(BinaryOp::Div),
        "%" => Node::Binary(BinaryOp::Mod),
        "&&" => Node::Binary(BinaryOp::And),
        "||" => Node::Binary(BinaryOp::Or),
        "==" => Node::Binary(BinaryOp::Eq),
        "!=" => Node::Binary(BinaryOp::Ne),
        "<" => Node::Binary(BinaryOp::Lt),
        "<=" => Node::Binary(BinaryOp::Lte),
        ">" => Node::Binary(BinaryOp::Gt),
        ">=" => Node::Binary(BinaryOp::Gte),
        "?" => Node::Binary(BinaryOp::Has),
        "!?" => Node::Binary(BinaryOp::Hasnt),
        "MIN" => Node::Binary(BinaryOp::Min),
        "MAX" => Node::Binary(BinaryOp::Max),
        "!" => Node::Unary(UnaryOp::Not),
        "_" => Node::Unary(UnaryOp::Neg),
        other => return Err(Error::UnrecognizedToken(other.to_string())),
    })
}

fn load_compound(map: &serde_json::Map<String, Json>) -> Result<Node> {
    if let Some(dest) = map.get("*") {
        let flags = match map.get("flg") {
            Some(v) => ChoiceFlags(json_i64(v)? as u32),
            None => ChoiceFlags::default(),
        };
        return Ok(Node::ChoicePoint {
            dest: Address::from(json_str(dest)?),
            flags,
        });
    }
    if let Some(dest) = map.get("->") {
        return Ok(Node::Divert {
            dest: Address::from(json_str(dest)?),
            var: map.get("var").map(json_bool).transpose()?.unwrap_or(false),
            conditional: map.get("c").map(json_bool).transpose()?.unwrap_or(false),
        });
    }
    if let Some(dest) = map.get("^->") {
        return Ok(Node::divert_target(json_str(dest)?));
    }
    if let Some(name) = map.get("temp=") {
        return Ok(Node::SetTemp {
            name: json_str(name)?.to_string(),
            reassign: map.get("re").map(json_bool).transpose()?.unwrap_or(false),
        });
    }
    if let Some(name) = map.get("VAR=") {
        return Ok(Node::SetVar {
            name: json_str(name)?.to_string(),
            reassign: map.get("re").map(json_bool).transpose()?.unwrap_or(false),
        });
    }
    if let Some(name) = map.get("VAR?") {
        return Ok(Node::GetVar {
            name: json_str(name)?.to_string(),
        });
    }
    if let Some(container) = map.get("CNT?") {
        return Ok(Node::GetVisitCount {
            container: json_str(container)?.to_string(),
        });
    }
    if let Some(dest) = map.get("f()") {
        return Ok(Node::FuncCall {
            dest: Address::from(json_str(dest)?),
        });
    }
    if let Some(dest) = map.get("->t->") {
        return Ok(Node::TunnelCall {
            dest: Address::from(json_str(dest)?),
        });
    }
    if let Some(name) = map.get("^var") {
        let content_index = match map.get("ci") {
            Some(v) => json_i64(v)? as u32,
            None => 0,
        };
        return Ok(Node::VarRef {
            name: json_str(name)?.to_string(),
            content_index,
        });
    }
    if let Some(items) = map.get("list") {
        let items = items.as_object().ok_or_else(|| {
            Error::MalformedNode(format!("list items must be an object: {items}"))
        })?;
        let mut list = ListValue::new();
        for (key, value) in items {
            let (origin, name) = key.split_once('.').ok_or_else(|| {
                Error::MalformedNode(format!("list item key must be origin.name: {key:?}"))
            })?;
            list.insert(ListItem {
                origin: origin.to_string(),
                name: name.to_string(),
                value: json_i64(value)?,
            });
        }
        if let Some(origins) = map.get("origins") {
            let origins = origins.as_array().ok_or_else(|| {
                Error::MalformedNode(format!("list origins must be an array: {origins}"))
            })?;
            let mut named = ListValue::with_origins(
                origins
                    .iter()
                    .map(|o| Ok(json_str(o)?.to_string()))
                    .collect::<Result<Vec<_>>>()?,
            );
            for item in list.items() {
                named.insert(item.clone());
            }
            list = named;
        }
        return Ok(Node::list(list));
    }
    Err(Error::MalformedNode(format!(
        "unsupported compound node: {}",
        Json::Object(map.clone())
    )))
}

fn json_str(v: &Json) -> Result<&str> {
    v.as_str()
        .ok_or_else(|| Error::MalformedNode(format!("expected string, got {v}")))
}

fn json_bool(v: &Json) -> Result<bool> {
    v.as_bool()
        .ok_or_else(|| Error::MalformedNode(format!("expected bool, got {v}")))
}

fn json_i64(v: &Json) -> Result<i64> {
    v.as_f64()
        .map(|f| f as i64)
        .ok_or_else(|| Error::MalformedNode(format!("expected number, got {v}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_story() {
        let story = load_str(
            r#"{"inkVersion":21,"root":["^Hello","\n","done",null],"listDefs":{}}"#,
        )
        .unwrap();
        let (el, _) = story.first();
        assert_eq!(
            story.node(el.unwrap()),
            &Node::Text("Hello".to_string())
        );
    }

    #[test]
    fn test_version_gate() {
        let too_old = load_str(r#"{"inkVersion":18,"root":["done",null]}"#);
        assert!(matches!(too_old, Err(Error::UnsupportedVersion(18))));
        let too_new = load_str(r#"{"inkVersion":22,"root":["done",null]}"#);
        assert!(matches!(too_new, Err(Error::UnsupportedVersion(22))));
        assert!(load_str(r#"{"inkVersion":19,"root":["done",null]}"#).is_ok());
    }

    #[test]
    fn test_unrecognized_token() {
        let err = load_str(r#"{"inkVersion":21,"root":["bogus",null]}"#);
        assert!(matches!(err, Err(Error::UnrecognizedToken(t)) if t == "bogus"));
    }

    #[test]
    fn test_load_named_nested_container() {
        let story = load_str(
            r##"{"inkVersion":21,"root":[{"->":"knot"},{"knot":["^Hi","\n","done",{"#f":1}],"#n":"root"}]}"##,
        )
        .unwrap();
        let (first, _) = story.first();
        let (el, _) = story
            .find(first.unwrap(), &Address::from("knot"))
            .unwrap();
        assert_eq!(story.node(el), &Node::Text("Hi".to_string()));
        let knot = story.container(el.container);
        assert!(knot.flags.records_visits());
    }

    #[test]
    fn test_load_compound_nodes() {
        let story = load_str(
            r#"{"inkVersion":21,"root":[
                {"*":"0.c-0","flg":20},
                {"->":"x","var":true,"c":true},
                {"^->":"some.target"},
                {"temp=":"t","re":true},
                {"VAR=":"v"},
                {"VAR?":"v"},
                {"CNT?":"knot"},
                {"f()":"fn"},
                {"->t->":"tun"},
                {"^var":"p","ci":1},
                null]}"#,
        )
        .unwrap();
        let root = story.container(story.root());
        assert_eq!(root.contents.len(), 10);
        assert!(matches!(
            &root.contents[0],
            Node::ChoicePoint { flags, .. } if flags.once_only() && flags.has_choice_only_content()
        ));
        assert!(matches!(
            &root.contents[1],
            Node::Divert { var: true, conditional: true, .. }
        ));
        assert!(matches!(&root.contents[9], Node::VarRef { content_index: 1, .. }));
    }

    #[test]
    fn test_load_literals() {
        let story = load_str(r#"{"inkVersion":21,"root":[3,2.5,true,"done",null]}"#).unwrap();
        let root = story.container(story.root());
        assert_eq!(root.contents[0], Node::int(3));
        assert_eq!(root.contents[1], Node::float(2.5));
        assert_eq!(root.contents[2], Node::Literal(Value::Bool(true)));
    }

    #[test]
    fn test_load_list_value_and_defs() {
        let story = load_str(
            r#"{"inkVersion":21,"root":[
                {"list":{"L.a":1},"origins":["L"]},
                "done",null],
                "listDefs":{"L":{"a":1,"b":2}}}"#,
        )
        .unwrap();
        let root = story.container(story.root());
        match &root.contents[0] {
            Node::Literal(Value::List(l)) => {
                assert_eq!(l.to_string(), "a");
                assert!(l.origins().contains("L"));
            }
            other => panic!("expected list literal, got {other:?}"),
        }
        assert!(story.list_defs().origin("L").is_some());
    }

    #[test]
    fn test_anonymous_inline_container() {
        let story = load_str(
            r#"{"inkVersion":21,"root":[["^inner",null],"^tail","done",null]}"#,
        )
        .unwrap();
        let (el, _) = story.first();
        let el = el.unwrap();
        assert_eq!(story.node(el), &Node::Text("inner".to_string()));
        // flow ascends back into the root afterwards
        let (el, _) = story.next(el);
        assert_eq!(story.node(el.unwrap()), &Node::Text("tail".to_string()));
        // anonymous containers address by content position
        let inner = match story.container(story.root()).contents[0] {
            Node::Container(id) => id,
            _ => unreachable!(),
        };
        assert_eq!(story.container(inner).address.as_str(), "0");
    }
}
