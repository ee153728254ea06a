//! Serialized program description (`model.json`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LoadError, Result};

/// File name of the program description inside a model directory.
pub const PROGRAM_FILE: &str = "model.json";

/// File name of the combined parameter container inside a model directory.
pub const COMBINED_PARAMS_FILE: &str = "params";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramDesc {
    #[serde(default)]
    pub name: String,
    /// Graph inputs, in feed order.
    #[serde(default)]
    pub feed: Vec<String>,
    /// Graph outputs, in fetch order.
    #[serde(default)]
    pub fetch: Vec<String>,
    #[serde(default)]
    pub vars: Vec<VarDesc>,
    pub ops: Vec<OpDesc>,
}

/// A declared variable. A `-1` dim is unknown until shape inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDesc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<i64>>,
    #[serde(default)]
    pub persistable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDesc {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub attrs: BTreeMap<String, Value>,
}

impl ProgramDesc {
    pub fn from_file(path: &Path) -> Result<ProgramDesc> {
        if !path.is_file() {
            return Err(LoadError::MissingFile(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<ProgramDesc> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn var(&self, name: &str) -> Option<&VarDesc> {
        self.vars.iter().find(|v| v.name == name)
    }

    /// Names of variables whose values come from the parameter container.
    pub fn persistable(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().filter(|v| v.persistable).map(|v| v.name.as_str())
    }
}

impl VarDesc {
    pub fn new(name: impl Into<String>, shape: Option<Vec<i64>>, persistable: bool) -> Self {
        VarDesc {
            name: name.into(),
            shape,
            persistable,
        }
    }
}

impl OpDesc {
    pub fn new(op_type: impl Into<String>) -> Self {
        OpDesc {
            op_type: op_type.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn input(mut self, slot: &str, name: impl Into<String>) -> Self {
        self.inputs.insert(slot.to_string(), vec![name.into()]);
        self
    }

    pub fn output(mut self, slot: &str, name: impl Into<String>) -> Self {
        self.outputs.insert(slot.to_string(), vec![name.into()]);
        self
    }

    pub fn attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "name": "tiny",
        "feed": ["image"],
        "fetch": ["prob"],
        "vars": [
            {"name": "image", "shape": [-1, 3, 8, 8]},
            {"name": "w", "shape": [4, 3, 3, 3], "persistable": true}
        ],
        "ops": [
            {"type": "conv2d",
             "inputs": {"Input": ["image"], "Filter": ["w"]},
             "outputs": {"Output": ["conv.tmp_0"]},
             "attrs": {"strides": [1, 1], "paddings": [1, 1]}},
            {"type": "softmax", "inputs": {"X": ["conv.tmp_0"]}, "outputs": {"Out": ["prob"]}}
        ]
    }"#;

    #[test]
    fn test_parse_program() {
        let p = ProgramDesc::from_json(SAMPLE).unwrap();
        assert_eq!(p.name, "tiny");
        assert_eq!(p.ops.len(), 2);
        assert_eq!(p.ops[0].op_type, "conv2d");
        assert_eq!(p.ops[0].inputs["Filter"], vec!["w".to_string()]);
        assert_eq!(p.var("image").unwrap().shape, Some(vec![-1, 3, 8, 8]));
        assert_eq!(p.persistable().collect::<Vec<_>>(), vec!["w"]);
        assert!(p.ops[1].attrs.is_empty());
    }

    #[test]
    fn test_json_round_trip() {
        let p = ProgramDesc::from_json(SAMPLE).unwrap();
        let again = ProgramDesc::from_json(&p.to_json().unwrap()).unwrap();
        assert_eq!(p, again);
    }

    #[test]
    fn test_builder() {
        let op = OpDesc::new("scale")
            .input("X", "a")
            .output("Out", "b")
            .attr("scale", 2.0);
        assert_eq!(op.attrs["scale"], serde_json::json!(2.0));
        assert_eq!(op.outputs["Out"], vec!["b".to_string()]);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(ProgramDesc::from_json("{\"ops\": 3}"), Err(LoadError::Json(_))));
    }
}
