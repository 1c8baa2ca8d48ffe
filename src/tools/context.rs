//! Untyped key/value map shared along the block pipeline.
//!
//! Transforms read their configuration from here ("transform", "blockSize",
//! "jobs", ...) and may publish findings back ("dataType") so later stages
//! can skip re-detection.
//!
use std::collections::HashMap;

/// Recognised values of the "dataType" context key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Undefined,
    Utf8,
    Exe,
    Multimedia,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Undefined => "UNDEFINED",
            DataType::Utf8 => "UTF8",
            DataType::Exe => "EXE",
            DataType::Multimedia => "MULTIMEDIA",
        }
    }

    pub fn from_str(s: &str) -> DataType {
        match s {
            "UTF8" => DataType::Utf8,
            "EXE" => DataType::Exe,
            "MULTIMEDIA" => DataType::Multimedia,
            _ => DataType::Undefined,
        }
    }
}

/// String map carrying pipeline configuration and hints between stages.
#[derive(Debug, Default, Clone)]
pub struct Context {
    map: HashMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self { map: HashMap::new() }
    }

    pub fn put_str(&mut self, key: &str, value: &str) {
        self.map.insert(key.to_string(), value.to_string());
    }

    pub fn put_int(&mut self, key: &str, value: i64) {
        self.map.insert(key.to_string(), value.to_string());
    }

    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.map.get(key).map(|s| s.as_str()).unwrap_or(default)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.map
            .get(key)
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(default)
    }

    /// Data type hint for the current block.
    pub fn data_type(&self) -> DataType {
        DataType::from_str(self.get_str("dataType", "UNDEFINED"))
    }

    pub fn set_data_type(&mut self, dt: DataType) {
        self.put_str("dataType", dt.as_str());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn get_put_test() {
        let mut ctx = Context::new();
        ctx.put_str("transform", "BWT+ROLZ");
        ctx.put_int("jobs", 4);
        assert_eq!(ctx.get_str("transform", "NONE"), "BWT+ROLZ");
        assert_eq!(ctx.get_int("jobs", 1), 4);
        assert_eq!(ctx.get_int("blockSize", 1 << 20), 1 << 20);
    }

    #[test]
    fn data_type_test() {
        let mut ctx = Context::new();
        assert_eq!(ctx.data_type(), DataType::Undefined);
        ctx.set_data_type(DataType::Exe);
        assert_eq!(ctx.data_type(), DataType::Exe);
    }
}
