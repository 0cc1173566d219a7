#![cfg_attr(not(feature = "std"), no_std)]
//! Pure-Rust Segregated Witness (BIP141/BIP144) validation.
//!
//! The crate decodes per-input witness stacks from their wire encoding, derives the script and
//! initial stack that a witness program commits to, and evaluates them to a consensus verdict.
//! A lighter sigop path derives the script used for witness sigop accounting without running it.
//!
//! ```
//! use segwit_consensus::Witness;
//!
//! let witness = Witness::from_data(&[0x02, 0x01, 0xaa, 0x00], true);
//! assert!(witness.is_valid());
//! assert_eq!(witness.to_string(), "[aa] []");
//! ```

#[cfg(all(feature = "external-secp", not(feature = "std")))]
compile_error!(
    "The `external-secp` feature requires `std` because it relies on the global secp256k1 context."
);

#[cfg(not(feature = "std"))]
extern crate alloc;

mod extract;
mod script;
pub mod stream;
mod verify;
mod witness;

pub use extract::{Commitment, Extraction, ScriptVersion};
pub use script::{count_sigops, Program, ScriptError, ScriptFlags};
pub use verify::{verify_input, ScriptMachine};
pub use witness::Witness;

use core::fmt;

/// Do not enable any verification.
pub const VERIFY_NONE: u32 = 0;
/// Evaluate P2SH (BIP16) subscripts.
pub const VERIFY_P2SH: u32 = 1 << 0;
/// Enforce strict ECDSA signature and public key encoding (BIP62).
pub const VERIFY_STRICTENC: u32 = 1 << 1;
/// Enforce strict DER (BIP66) compliance.
pub const VERIFY_DERSIG: u32 = 1 << 2;
/// Require signatures to use low-S form (BIP62).
pub const VERIFY_LOW_S: u32 = 1 << 3;
/// Enforce NULLDUMMY (BIP147).
pub const VERIFY_NULLDUMMY: u32 = 1 << 4;
/// Require minimal data encodings (BIP62).
pub const VERIFY_MINIMALDATA: u32 = 1 << 6;
/// Discourage use of upgradable NOP opcodes.
pub const VERIFY_DISCOURAGE_UPGRADABLE_NOPS: u32 = 1 << 7;
/// Enable CHECKLOCKTIMEVERIFY (BIP65).
pub const VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 9;
/// Enable CHECKSEQUENCEVERIFY (BIP112).
pub const VERIFY_CHECKSEQUENCEVERIFY: u32 = 1 << 10;
/// Enable WITNESS (BIP141).
pub const VERIFY_WITNESS: u32 = 1 << 11;
/// Require minimal encodings for IF/NOTIF conditions in witness scripts.
pub const VERIFY_MINIMALIF: u32 = 1 << 13;
/// Enforce NULLFAIL behaviour (BIP146).
pub const VERIFY_NULLFAIL: u32 = 1 << 14;
/// Require compressed pubkeys in segwit v0 contexts.
pub const VERIFY_WITNESS_PUBKEYTYPE: u32 = 1 << 15;

/// Aggregate of the consensus soft-fork flags through segwit activation.
pub const VERIFY_ALL: u32 = VERIFY_P2SH
    | VERIFY_DERSIG
    | VERIFY_NULLDUMMY
    | VERIFY_CHECKLOCKTIMEVERIFY
    | VERIFY_CHECKSEQUENCEVERIFY
    | VERIFY_WITNESS;

/// Maximum block weight (BIP141). Also bounds witness element counts and lengths on the wire.
pub const MAX_BLOCK_WEIGHT: usize = 4_000_000;
/// Maximum size of a pushed stack element.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
/// Size of a p2wkh witness program (hash160).
pub const SHORT_HASH_SIZE: usize = 20;
/// Size of a p2wsh witness program (sha256).
pub const HASH_SIZE: usize = 32;

/// Computes flags for soft fork activation heights on the Bitcoin network.
pub fn height_to_flags(height: u32) -> u32 {
    let mut flag = VERIFY_NONE;

    if height >= 173_805 {
        flag |= VERIFY_P2SH;
    }
    if height >= 363_725 {
        flag |= VERIFY_DERSIG;
    }
    if height >= 388_381 {
        flag |= VERIFY_CHECKLOCKTIMEVERIFY;
    }
    if height >= 419_328 {
        flag |= VERIFY_CHECKSEQUENCEVERIFY;
    }
    if height >= 481_824 {
        flag |= VERIFY_NULLDUMMY | VERIFY_WITNESS;
    }

    flag
}

/// Verdict errors returned by witness verification.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The witness could not be turned into a runnable script and stack.
    InvalidWitness,
    /// Evaluation finished without a clean stack holding a single true element.
    StackFalse,
    /// The program script does not commit to a witness program.
    UnversionedScript,
    /// The input index does not address an input of the transaction.
    TxIndex,
    /// Script verification flags contain unsupported bits.
    ///
    /// Returned only when building [`ScriptFlags`] with [`ScriptFlags::from_bits`]; verification
    /// itself never produces it.
    InvalidFlags,
    /// Evaluation failed inside the script machine.
    Script(ScriptError),
}

impl From<ScriptError> for Error {
    fn from(err: ScriptError) -> Self {
        Error::Script(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::InvalidWitness => f.write_str("invalid witness"),
            Error::StackFalse => f.write_str("script evaluated without a clean true stack"),
            Error::UnversionedScript => f.write_str("script is not a witness program"),
            Error::TxIndex => f.write_str("an invalid index for the transaction input"),
            Error::InvalidFlags => f.write_str("script verification flags are invalid"),
            Error::Script(err) => write!(f, "script evaluation failed: {err:?}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
