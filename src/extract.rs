//! Witness program classification and script extraction.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use bitcoin::{
    blockdata::script::{Builder, Script, ScriptBuf},
    hashes::{sha256, Hash},
    opcodes::all,
};
use log::debug;

use crate::{script::count_sigops, witness::Witness, HASH_SIZE, SHORT_HASH_SIZE};

/// Witness version family of a commitment script.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptVersion {
    /// Version 0 witness program (BIP141).
    Zero,
    /// Versions 1 through 16, accepted unconditionally.
    Reserved,
    /// Not a witness program.
    Unversioned,
}

/// What a commitment (output) script commits the spending witness to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Commitment<'a> {
    /// Version 0, 20-byte program: pay to witness public key hash.
    KeyHash(&'a [u8; SHORT_HASH_SIZE]),
    /// Version 0, 32-byte program: pay to witness script hash.
    ScriptHash(&'a [u8; HASH_SIZE]),
    /// Version 0 with any other program length.
    UndefinedV0(&'a [u8]),
    /// Versions 1 through 16.
    Reserved { version: u8, program: &'a [u8] },
    /// Anything that is not a witness program.
    Unversioned,
}

impl<'a> Commitment<'a> {
    /// Classifies `script` by its witness version and program.
    ///
    /// A witness program is 4 to 42 bytes: a version opcode (`OP_0` or `OP_1`..`OP_16`)
    /// followed by one direct push of the remaining bytes.
    pub fn classify(script: &'a Script) -> Self {
        let bytes = script.as_bytes();
        if !(4..=42).contains(&bytes.len()) || usize::from(bytes[1]) + 2 != bytes.len() {
            return Commitment::Unversioned;
        }

        let program = &bytes[2..];
        match bytes[0] {
            0x00 => {
                if let Ok(hash) = <&[u8; SHORT_HASH_SIZE]>::try_from(program) {
                    Commitment::KeyHash(hash)
                } else if let Ok(hash) = <&[u8; HASH_SIZE]>::try_from(program) {
                    Commitment::ScriptHash(hash)
                } else {
                    Commitment::UndefinedV0(program)
                }
            }
            op @ 0x51..=0x60 => Commitment::Reserved {
                version: op - 0x50,
                program,
            },
            _ => Commitment::Unversioned,
        }
    }

    pub fn version(&self) -> ScriptVersion {
        match self {
            Commitment::KeyHash(_) | Commitment::ScriptHash(_) | Commitment::UndefinedV0(_) => {
                ScriptVersion::Zero
            }
            Commitment::Reserved { .. } => ScriptVersion::Reserved,
            Commitment::Unversioned => ScriptVersion::Unversioned,
        }
    }

    /// Witness program bytes, or `None` when unversioned.
    pub fn program(&self) -> Option<&'a [u8]> {
        match *self {
            Commitment::KeyHash(hash) => Some(&hash[..]),
            Commitment::ScriptHash(hash) => Some(&hash[..]),
            Commitment::UndefinedV0(program) | Commitment::Reserved { program, .. } => {
                Some(program)
            }
            Commitment::Unversioned => None,
        }
    }
}

/// Script to execute and the stack it starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub script: ScriptBuf,
    pub stack: Vec<Vec<u8>>,
}

impl Witness {
    /// Derives the script and initial stack that `program_script` commits this witness to.
    ///
    /// Returns `None` when the witness does not satisfy the program's shape, a p2wsh script
    /// does not hash to the program, or `program_script` is not a witness program.
    pub fn extract_script(&self, program_script: &Script) -> Option<Extraction> {
        match Commitment::classify(program_script) {
            Commitment::KeyHash(hash) => {
                if self.len() != 2 {
                    debug!("p2wkh witness has {} elements", self.len());
                    return None;
                }
                Some(Extraction {
                    script: p2wkh_script(hash),
                    stack: self.stack().to_vec(),
                })
            }
            Commitment::ScriptHash(hash) => {
                let (stack, script) = split_top(self.stack().to_vec())?;
                if sha256::Hash::hash(&script).as_byte_array() != hash {
                    debug!("p2wsh script does not match its program");
                    return None;
                }
                Some(Extraction {
                    script: ScriptBuf::from_bytes(script),
                    stack,
                })
            }
            Commitment::UndefinedV0(program) => {
                debug!("undefined version 0 program of {} bytes", program.len());
                None
            }
            Commitment::Reserved { .. } => Some(Extraction {
                script: ScriptBuf::new(),
                stack: self.stack().to_vec(),
            }),
            Commitment::Unversioned => None,
        }
    }

    /// Derives the script counted for witness sigops without checking the witness.
    ///
    /// The caller is expected to have verified the witness already; p2wsh returns the top
    /// element unhashed. Returns `None` only when `program_script` is not a witness program.
    pub fn extract_sigop_script(&self, program_script: &Script) -> Option<ScriptBuf> {
        match Commitment::classify(program_script) {
            Commitment::KeyHash(_) => {
                Some(Builder::new().push_opcode(all::OP_CHECKSIG).into_script())
            }
            Commitment::ScriptHash(_) => Some(
                self.stack()
                    .last()
                    .map(|script| ScriptBuf::from_bytes(script.clone()))
                    .unwrap_or_default(),
            ),
            Commitment::UndefinedV0(_) | Commitment::Reserved { .. } => Some(ScriptBuf::new()),
            Commitment::Unversioned => None,
        }
    }

    /// Accurate sigop count of [`Witness::extract_sigop_script`].
    pub fn sigop_count(&self, program_script: &Script) -> Option<u32> {
        self.extract_sigop_script(program_script)
            .map(|script| count_sigops(&script, true))
    }
}

fn p2wkh_script(hash: &[u8; SHORT_HASH_SIZE]) -> ScriptBuf {
    Builder::new()
        .push_opcode(all::OP_DUP)
        .push_opcode(all::OP_HASH160)
        .push_slice(*hash)
        .push_opcode(all::OP_EQUALVERIFY)
        .push_opcode(all::OP_CHECKSIG)
        .into_script()
}

/// Splits the top element off an owned stack.
fn split_top(mut stack: Vec<Vec<u8>>) -> Option<(Vec<Vec<u8>>, Vec<u8>)> {
    let top = stack.pop()?;
    Some((stack, top))
}
