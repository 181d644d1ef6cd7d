//! Contract artifacts and library linking.

use crate::error::ArtifactError;
use alloy_json_abi::JsonAbi;
use alloy_primitives::{hex, keccak256, Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Position of a library address placeholder in the creation bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReference {
    /// Byte offset into the bytecode.
    pub start: usize,
    pub length: usize,
}

/// A compiled contract, in the Hardhat artifact format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub contract_name: String,
    #[serde(default)]
    pub source_name: String,
    pub abi: JsonAbi,
    /// Hex creation bytecode. Unlinked library addresses are placeholders,
    /// so this is not always valid hex.
    pub bytecode: String,
    /// Source file -> library name -> placeholder positions.
    #[serde(default)]
    pub link_references: BTreeMap<String, BTreeMap<String, Vec<LinkReference>>>,
}

impl Artifact {
    /// Names of the libraries this contract must be linked against, as
    /// `(source file, library name)` pairs.
    pub fn required_libraries(&self) -> Vec<(&str, &str)> {
        self.link_references
            .iter()
            .flat_map(|(source, libs)| libs.keys().map(move |lib| (source.as_str(), lib.as_str())))
            .collect()
    }

    /// keccak256 of the unlinked bytecode without its metadata trailer.
    ///
    /// Recompiling the same source with different metadata keeps the hash.
    pub fn bytecode_hash(&self) -> B256 {
        let code = self.bytecode.trim_start_matches("0x").to_ascii_lowercase();
        keccak256(strip_metadata(&code).as_bytes())
    }

    /// Creation bytecode with every library placeholder replaced.
    ///
    /// `libraries` maps a library name, either bare or as `source:Name`, to
    /// its deployed address. Every required library must be present and no
    /// unneeded one may be given.
    pub fn link(&self, libraries: &BTreeMap<String, Address>) -> Result<Bytes, ArtifactError> {
        let mut code = self.bytecode.trim_start_matches("0x").to_string();
        let required = self.required_libraries();

        for name in libraries.keys() {
            let matches = required
                .iter()
                .filter(|(source, lib)| library_matches(name, source, lib))
                .count();
            match matches {
                0 => {
                    return Err(ArtifactError::UnneededLibrary {
                        contract: self.contract_name.clone(),
                        library: name.clone(),
                    })
                }
                1 => {}
                _ => {
                    return Err(ArtifactError::AmbiguousLibrary {
                        contract: self.contract_name.clone(),
                        library: name.clone(),
                    })
                }
            }
        }

        for (source, lib) in required {
            let address = libraries
                .iter()
                .find(|(name, _)| library_matches(name, source, lib))
                .map(|(_, address)| address)
                .ok_or_else(|| ArtifactError::MissingLibrary {
                    contract: self.contract_name.clone(),
                    library: format!("{source}:{lib}"),
                })?;
            let replacement = hex::encode(address);
            for reference in &self.link_references[source][lib] {
                let start = reference.start * 2;
                let end = start + reference.length * 2;
                if end > code.len() || reference.length != 20 {
                    return Err(ArtifactError::InvalidBytecode {
                        contract: self.contract_name.clone(),
                        reason: format!("bad link reference for {lib} at {}", reference.start),
                    });
                }
                code.replace_range(start..end, &replacement);
            }
        }

        hex::decode(&code)
            .map(Bytes::from)
            .map_err(|err| ArtifactError::InvalidBytecode {
                contract: self.contract_name.clone(),
                reason: err.to_string(),
            })
    }
}

fn library_matches(name: &str, source: &str, lib: &str) -> bool {
    name == lib || name == format!("{source}:{lib}")
}

/// Removes the CBOR metadata trailer the Solidity compiler appends.
///
/// The last two bytes encode the trailer length. Anything that does not
/// look like a CBOR map is left untouched.
pub fn strip_metadata(code: &str) -> &str {
    if code.len() < 4 {
        return code;
    }
    let Ok(len) = usize::from_str_radix(&code[code.len() - 4..], 16) else {
        return code;
    };
    let trailer = (len + 2) * 2;
    if len == 0 || trailer > code.len() {
        return code;
    }
    let start = code.len() - trailer;
    match &code[start..start + 2] {
        "a1" | "a2" | "a3" | "a4" => &code[..start],
        _ => code,
    }
}

/// Source of contract artifacts.
pub trait ArtifactResolver: Send + Sync {
    fn load_artifact(&self, contract_name: &str) -> Result<Artifact, ArtifactError>;
}

/// Artifacts held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifacts {
    artifacts: BTreeMap<String, Artifact>,
}

impl MemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: Artifact) {
        self.artifacts
            .insert(artifact.contract_name.clone(), artifact);
    }

    pub fn with(mut self, artifact: Artifact) -> Self {
        self.insert(artifact);
        self
    }
}

impl ArtifactResolver for MemoryArtifacts {
    fn load_artifact(&self, contract_name: &str) -> Result<Artifact, ArtifactError> {
        self.artifacts
            .get(contract_name)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(contract_name.to_string()))
    }
}

/// Artifacts read from `<dir>/<ContractName>.json`.
#[derive(Debug, Clone)]
pub struct FsArtifacts {
    dir: PathBuf,
}

impl FsArtifacts {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl ArtifactResolver for FsArtifacts {
    fn load_artifact(&self, contract_name: &str) -> Result<Artifact, ArtifactError> {
        let path = self.dir.join(format!("{contract_name}.json"));
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound(contract_name.to_string()))
            }
            Err(source) => return Err(ArtifactError::Io { path, source }),
        };
        serde_json::from_slice(&contents).map_err(|source| ArtifactError::Parse { path, source })
    }
}
