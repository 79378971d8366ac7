//! Typed `key:value` plugin arguments
//!
//! `--model-args "hidden:20,lr:0.1,name:'mlp',bias:true"` parses into a
//! [`KwArgs`] map. Values are typed by their spelling: `true`/`false` are
//! booleans, integer literals are `Int`, other numbers are `Float`, and
//! everything else (optionally quoted) is a string.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One argument value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KwValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl KwValue {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Some(s) = unquote(raw) {
            return KwValue::Str(s.to_string());
        }
        match raw {
            "true" | "True" => KwValue::Bool(true),
            "false" | "False" => KwValue::Bool(false),
            _ => raw
                .parse::<i64>()
                .map(KwValue::Int)
                .or_else(|_| raw.parse::<f64>().map(KwValue::Float))
                .unwrap_or_else(|_| KwValue::Str(raw.to_string())),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            KwValue::Bool(_) => "bool",
            KwValue::Int(_) => "int",
            KwValue::Float(_) => "float",
            KwValue::Str(_) => "string",
        }
    }
}

impl fmt::Display for KwValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KwValue::Bool(b) => write!(f, "{b}"),
            KwValue::Int(i) => write!(f, "{i}"),
            KwValue::Float(x) => write!(f, "{x}"),
            KwValue::Str(s) => write!(f, "'{s}'"),
        }
    }
}

fn unquote(s: &str) -> Option<&str> {
    ['\'', '"'].iter().find_map(|&q| {
        s.strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
    })
}

/// Keyword arguments handed to model and dataset factories
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KwArgs(BTreeMap<String, KwValue>);

impl KwArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: KwValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&KwValue> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Entries of `other` replace entries with the same key
    pub fn merge(&mut self, other: KwArgs) {
        self.0.extend(other.0);
    }

    fn mismatch(key: &str, expected: &str, got: &KwValue) -> Error {
        Error::Config(format!(
            "argument '{key}' must be {expected}, got {} {got}",
            got.type_name()
        ))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(KwValue::Bool(b)) => Ok(*b),
            Some(other) => Err(Self::mismatch(key, "a bool", other)),
        }
    }

    pub fn get_usize(&self, key: &str, default: usize) -> Result<usize> {
        match self.get(key) {
            None => Ok(default),
            Some(KwValue::Int(i)) => {
                usize::try_from(*i).map_err(|_| Self::mismatch(key, "non-negative", &KwValue::Int(*i)))
            }
            Some(other) => Err(Self::mismatch(key, "an int", other)),
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> Result<f64> {
        match self.get(key) {
            None => Ok(default),
            Some(KwValue::Int(i)) => Ok(*i as f64),
            Some(KwValue::Float(x)) => Ok(*x),
            Some(other) => Err(Self::mismatch(key, "a number", other)),
        }
    }

    pub fn get_f32(&self, key: &str, default: f32) -> Result<f32> {
        self.get_f64(key, f64::from(default)).map(|x| x as f32)
    }

    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str> {
        match self.get(key) {
            None => Ok(default),
            Some(KwValue::Str(s)) => Ok(s),
            Some(other) => Err(Self::mismatch(key, "a string", other)),
        }
    }
}

impl FromStr for KwArgs {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut args = KwArgs::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (key, value) = entry
                .split_once(':')
                .ok_or_else(|| Error::Config(format!("expected key:value, got '{entry}'")))?;
            let key = key.trim();
            let key = unquote(key).unwrap_or(key);
            if key.is_empty() {
                return Err(Error::Config(format!("empty key in '{entry}'")));
            }
            args.insert(key, KwValue::parse(value));
        }
        Ok(args)
    }
}

impl fmt::Display for KwArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}:{v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typed_values() {
        let args: KwArgs = "'hidden':20, lr:0.5, name:\"mlp\", bias:true, act:relu"
            .parse()
            .unwrap();
        assert_eq!(args.get("hidden"), Some(&KwValue::Int(20)));
        assert_eq!(args.get("lr"), Some(&KwValue::Float(0.5)));
        assert_eq!(args.get("name"), Some(&KwValue::Str("mlp".into())));
        assert_eq!(args.get("bias"), Some(&KwValue::Bool(true)));
        assert_eq!(args.get("act"), Some(&KwValue::Str("relu".into())));
    }

    #[test]
    fn test_quoted_number_stays_string() {
        let args: KwArgs = "id:'42'".parse().unwrap();
        assert_eq!(args.get_str("id", "").unwrap(), "42");
    }

    #[test]
    fn test_empty_input() {
        let args: KwArgs = "".parse().unwrap();
        assert!(args.is_empty());
    }

    #[test]
    fn test_missing_colon_is_error() {
        assert!("hidden=20".parse::<KwArgs>().is_err());
        assert!(":3".parse::<KwArgs>().is_err());
    }

    #[test]
    fn test_typed_getters() {
        let args: KwArgs = "n:3,lr:1,flag:false".parse().unwrap();
        assert_eq!(args.get_usize("n", 0).unwrap(), 3);
        assert_eq!(args.get_usize("missing", 7).unwrap(), 7);
        assert_eq!(args.get_f32("lr", 0.0).unwrap(), 1.0);
        assert!(!args.get_bool("flag", true).unwrap());
        assert!(args.get_usize("lr", 0).is_ok());
        assert!(args.get_bool("n", false).is_err());
    }

    #[test]
    fn test_negative_usize_rejected() {
        let args: KwArgs = "n:-1".parse().unwrap();
        assert!(args.get_usize("n", 0).is_err());
    }

    #[test]
    fn test_merge_overrides() {
        let mut base: KwArgs = "a:1,b:2".parse().unwrap();
        base.merge("b:3".parse().unwrap());
        assert_eq!(base.to_string(), "a:1,b:3");
    }

    #[test]
    fn test_yaml_values_keep_types() {
        let args: KwArgs = serde_yaml::from_str("{n: 4, noise: 0.1, name: toy, shuffle: true}").unwrap();
        assert_eq!(args.get("n"), Some(&KwValue::Int(4)));
        assert_eq!(args.get("noise"), Some(&KwValue::Float(0.1)));
        assert_eq!(args.get("name"), Some(&KwValue::Str("toy".into())));
        assert_eq!(args.get("shuffle"), Some(&KwValue::Bool(true)));
    }
}
