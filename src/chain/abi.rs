//! Emitter ABI handling.
//!
//! The emitter describes one generic event whose payload is a struct of
//! keyed item maps across the ABI's scalar types. The JSON is lowered to
//! `(name, ParamType)` pairs once at startup; decoding is entirely
//! data-driven so payload additions pass through without code changes.

use anyhow::{anyhow, bail, Context, Result};
use ethers::abi::ParamType;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct AbiInput {
    #[serde(default)]
    indexed: bool,
    #[serde(default)]
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    components: Vec<AbiInput>,
}

#[derive(Debug, Deserialize)]
struct AbiEvent {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    inputs: Vec<AbiInput>,
}

/// The emitter event's non-indexed inputs, in declaration order. These are
/// exactly the values ABI-encoded into a log's `data` payload.
#[derive(Debug, Clone)]
pub struct EmitterAbi {
    pub event_name: String,
    pub inputs: Vec<(String, ParamType)>,
}

impl EmitterAbi {
    /// Loads and lowers the ABI file. Any failure here is a fatal startup
    /// error for the indexer.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read ABI file {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let event: AbiEvent = serde_json::from_str(raw).context("malformed emitter ABI")?;
        if event.kind != "event" {
            bail!("emitter ABI must describe an event, got {:?}", event.kind);
        }

        let mut inputs = Vec::new();
        for input in event.inputs.iter().filter(|input| !input.indexed) {
            inputs.push((input.name.clone(), lower_param_type(input)?));
        }
        if inputs.is_empty() {
            bail!("emitter event {} has no non-indexed inputs", event.name);
        }

        Ok(Self {
            event_name: event.name,
            inputs,
        })
    }

    pub fn param_types(&self) -> Vec<ParamType> {
        self.inputs.iter().map(|(_, ty)| ty.clone()).collect()
    }
}

fn lower_param_type(input: &AbiInput) -> Result<ParamType> {
    let (base, is_array) = match input.kind.strip_suffix("[]") {
        Some(base) => (base, true),
        None => (input.kind.as_str(), false),
    };

    let inner = if base == "tuple" {
        let fields = input
            .components
            .iter()
            .map(lower_param_type)
            .collect::<Result<Vec<_>>>()?;
        ParamType::Tuple(fields)
    } else {
        scalar_param_type(base)?
    };

    Ok(if is_array {
        ParamType::Array(Box::new(inner))
    } else {
        inner
    })
}

fn scalar_param_type(kind: &str) -> Result<ParamType> {
    match kind {
        "address" => Ok(ParamType::Address),
        "bool" => Ok(ParamType::Bool),
        "string" => Ok(ParamType::String),
        "bytes" => Ok(ParamType::Bytes),
        _ => {
            if let Some(bits) = kind.strip_prefix("uint") {
                return Ok(ParamType::Uint(parse_size(bits, 256)?));
            }
            if let Some(bits) = kind.strip_prefix("int") {
                return Ok(ParamType::Int(parse_size(bits, 256)?));
            }
            if let Some(size) = kind.strip_prefix("bytes") {
                return Ok(ParamType::FixedBytes(parse_size(size, 32)?));
            }
            Err(anyhow!("unsupported ABI type {:?}", kind))
        }
    }
}

fn parse_size(suffix: &str, default: usize) -> Result<usize> {
    if suffix.is_empty() {
        return Ok(default);
    }
    suffix
        .parse()
        .with_context(|| format!("invalid ABI type size suffix {:?}", suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_emitter_abi_parses() {
        let abi = EmitterAbi::parse(include_str!("../../abi_emitter.json")).unwrap();
        assert_eq!(abi.event_name, "EventLog1");

        // Non-indexed inputs end in the payload tuple of seven item maps.
        let (name, ty) = abi.inputs.last().unwrap();
        assert_eq!(name, "eventData");
        let ParamType::Tuple(sections) = ty else {
            panic!("payload is not a tuple");
        };
        assert_eq!(sections.len(), 7);

        // Each section is (items, arrayItems) of keyed pairs.
        for section in sections {
            let ParamType::Tuple(parts) = section else {
                panic!("section is not a tuple");
            };
            assert_eq!(parts.len(), 2);
            assert!(matches!(parts[0], ParamType::Array(_)));
            assert!(matches!(parts[1], ParamType::Array(_)));
        }
    }

    #[test]
    fn indexed_inputs_are_excluded() {
        let abi = EmitterAbi::parse(include_str!("../../abi_emitter.json")).unwrap();
        assert!(abi.inputs.iter().all(|(name, _)| name != "eventNameHash"));
        assert!(abi.inputs.iter().all(|(name, _)| name != "topic1"));
    }

    #[test]
    fn rejects_non_event_abi() {
        let raw = r#"{"type": "function", "name": "decimals", "inputs": []}"#;
        assert!(EmitterAbi::parse(raw).is_err());
    }

    #[test]
    fn lowers_scalar_and_array_types() {
        let raw = r#"{
            "type": "event",
            "name": "Example",
            "inputs": [
                {"indexed": false, "name": "a", "type": "uint256"},
                {"indexed": false, "name": "b", "type": "bytes32"},
                {"indexed": false, "name": "c", "type": "address[]"}
            ]
        }"#;
        let abi = EmitterAbi::parse(raw).unwrap();
        assert_eq!(
            abi.param_types(),
            vec![
                ParamType::Uint(256),
                ParamType::FixedBytes(32),
                ParamType::Array(Box::new(ParamType::Address)),
            ]
        );
    }
}
