//! Script interpreter for legacy and witness v0 scripts.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};
#[cfg(all(feature = "std", not(feature = "external-secp")))]
use std::sync::OnceLock;

use core::mem;

use bitcoin::{
    absolute::LOCK_TIME_THRESHOLD,
    blockdata::script::{Instruction, PushBytesBuf, Script, ScriptBuf},
    blockdata::transaction::Sequence,
    hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash},
    opcodes::{all, Opcode},
    script::Builder,
    secp256k1::{self, ecdsa::Signature as EcdsaSignature, Message, PublicKey, Secp256k1},
    sighash::{EcdsaSighashType, SegwitV0Sighash, SighashCache},
    Amount, Transaction,
};
use log::debug;

use crate::{
    extract::ScriptVersion, Error, MAX_SCRIPT_ELEMENT_SIZE, VERIFY_CHECKLOCKTIMEVERIFY,
    VERIFY_CHECKSEQUENCEVERIFY, VERIFY_DERSIG, VERIFY_DISCOURAGE_UPGRADABLE_NOPS, VERIFY_LOW_S,
    VERIFY_MINIMALDATA, VERIFY_MINIMALIF, VERIFY_NULLDUMMY, VERIFY_NULLFAIL, VERIFY_P2SH,
    VERIFY_STRICTENC, VERIFY_WITNESS, VERIFY_WITNESS_PUBKEYTYPE,
};

/// Script evaluation failure codes, named after Bitcoin Core's `ScriptError_t`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptError {
    Unknown,
    EvalFalse,
    OpReturn,
    ScriptSize,
    PushSize,
    OpCount,
    StackSize,
    SigCount,
    PubkeyCount,
    Verify,
    EqualVerify,
    CheckSigVerify,
    CheckMultiSigVerify,
    NumEqualVerify,
    BadOpcode,
    DisabledOpcode,
    InvalidStackOperation,
    InvalidAltstackOperation,
    UnbalancedConditional,
    NegativeLockTime,
    UnsatisfiedLockTime,
    SigHashType,
    SigDer,
    MinimalData,
    SigHighS,
    SigNullDummy,
    PubkeyType,
    CleanStack,
    MinimalIf,
    NullFail,
    DiscourageUpgradableNops,
    WitnessPubkeyType,
}

const SUPPORTED_FLAGS: u32 = VERIFY_P2SH
    | VERIFY_STRICTENC
    | VERIFY_DERSIG
    | VERIFY_LOW_S
    | VERIFY_NULLDUMMY
    | VERIFY_MINIMALDATA
    | VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | VERIFY_CHECKLOCKTIMEVERIFY
    | VERIFY_CHECKSEQUENCEVERIFY
    | VERIFY_WITNESS
    | VERIFY_MINIMALIF
    | VERIFY_NULLFAIL
    | VERIFY_WITNESS_PUBKEYTYPE;

const MAX_STACK_SIZE: usize = 1000;
const MAX_SCRIPT_SIZE: usize = 10_000;
const MAX_OPS_PER_SCRIPT: usize = 201;
const SCRIPTNUM_MAX_LEN: usize = 4;
const SCRIPTNUM_MAX_LEN_EXTENDED: usize = 5;
const MAX_PUBKEYS_PER_MULTISIG: usize = 20;
const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000ffff;

#[cfg(all(feature = "external-secp", feature = "std"))]
type VerificationContext = Secp256k1<secp256k1::All>;
#[cfg(not(all(feature = "external-secp", feature = "std")))]
type VerificationContext = Secp256k1<secp256k1::VerifyOnly>;

#[cfg(all(feature = "std", not(feature = "external-secp")))]
static SECP256K1: OnceLock<VerificationContext> = OnceLock::new();

fn with_secp256k1_verification_ctx<R>(f: impl FnOnce(&VerificationContext) -> R) -> R {
    #[cfg(all(feature = "std", feature = "external-secp"))]
    {
        f(&*secp256k1::global::SECP256K1)
    }
    #[cfg(all(feature = "std", not(feature = "external-secp")))]
    {
        f(SECP256K1.get_or_init(Secp256k1::verification_only))
    }
    #[cfg(not(feature = "std"))]
    {
        let ctx = Secp256k1::verification_only();
        f(&ctx)
    }
}

/// Wrapper for script verification flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptFlags(u32);

impl ScriptFlags {
    pub fn from_bits(bits: u32) -> Result<Self, Error> {
        if bits & !SUPPORTED_FLAGS != 0 {
            return Err(Error::InvalidFlags);
        }
        Ok(Self(Self::apply_implied_bits(bits)))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    fn apply_implied_bits(mut bits: u32) -> u32 {
        if bits & VERIFY_WITNESS != 0 {
            bits |= VERIFY_P2SH;
        }
        bits
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SigVersion {
    Base,
    WitnessV0,
}

#[derive(Debug, Default, Clone)]
struct ScriptStack {
    items: Vec<Vec<u8>>,
}

impl ScriptStack {
    fn push(&mut self, data: Vec<u8>) -> Result<(), ScriptError> {
        if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(ScriptError::PushSize);
        }
        self.items.push(data);
        Ok(())
    }

    fn push_bool(&mut self, value: bool) -> Result<(), ScriptError> {
        if value {
            self.push(vec![1])
        } else {
            self.push(Vec::new())
        }
    }

    fn push_num(&mut self, value: i64) -> Result<(), ScriptError> {
        self.push(encode_num(value))
    }

    fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.items.pop().ok_or(ScriptError::InvalidStackOperation)
    }

    /// Element `depth` positions from the top; the top is depth 1.
    fn top(&self, depth: usize) -> Result<&[u8], ScriptError> {
        if depth == 0 || depth > self.items.len() {
            return Err(ScriptError::InvalidStackOperation);
        }
        Ok(&self.items[self.items.len() - depth])
    }

    fn require(&self, count: usize) -> Result<(), ScriptError> {
        if self.items.len() < count {
            Err(ScriptError::InvalidStackOperation)
        } else {
            Ok(())
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A script bound to the input it runs for.
///
/// The program owns its initial stack. Witness version zero programs use BIP143 signature
/// hashing over the spent `value`; anything else runs with legacy hashing.
pub struct Program<'tx> {
    script: ScriptBuf,
    tx: &'tx Transaction,
    input_index: usize,
    flags: ScriptFlags,
    value: Amount,
    sigversion: SigVersion,
    sighash_cache: SighashCache<&'tx Transaction>,
    stack: ScriptStack,
    exec_stack: Vec<bool>,
    op_count: usize,
}

impl<'tx> Program<'tx> {
    pub fn new(
        script: ScriptBuf,
        tx: &'tx Transaction,
        input_index: usize,
        flags: ScriptFlags,
        stack: Vec<Vec<u8>>,
        value: Amount,
        version: ScriptVersion,
    ) -> Self {
        let sigversion = match version {
            ScriptVersion::Zero => SigVersion::WitnessV0,
            ScriptVersion::Reserved | ScriptVersion::Unversioned => SigVersion::Base,
        };
        Self {
            script,
            tx,
            input_index,
            flags,
            value,
            sigversion,
            sighash_cache: SighashCache::new(tx),
            stack: ScriptStack { items: stack },
            exec_stack: Vec::new(),
            op_count: 0,
        }
    }

    /// Runs the script against the current stack.
    pub fn evaluate(&mut self) -> Result<(), ScriptError> {
        if self.input_index >= self.tx.input.len() {
            return Err(ScriptError::Unknown);
        }
        if self.sigversion == SigVersion::WitnessV0 {
            if self.stack.len() > MAX_STACK_SIZE {
                return Err(ScriptError::StackSize);
            }
            if self
                .stack
                .items
                .iter()
                .any(|item| item.len() > MAX_SCRIPT_ELEMENT_SIZE)
            {
                return Err(ScriptError::PushSize);
            }
        }

        let script = mem::take(&mut self.script);
        let result = self.run_script(&script);
        self.script = script;
        if let Err(err) = result {
            debug!("script evaluation failed for input {}: {err:?}", self.input_index);
        }
        result
    }

    /// True when the stack is non-empty, its top element is true and, with `clean`, it holds
    /// exactly one element.
    pub fn stack_result(&self, clean: bool) -> bool {
        match self.stack.items.last() {
            Some(top) => (!clean || self.stack.len() == 1) && cast_to_bool(top),
            None => false,
        }
    }

    pub fn stack(&self) -> &[Vec<u8>] {
        &self.stack.items
    }

    fn add_ops(&mut self, count: usize) -> Result<(), ScriptError> {
        self.op_count += count;
        if self.op_count > MAX_OPS_PER_SCRIPT {
            Err(ScriptError::OpCount)
        } else {
            Ok(())
        }
    }

    fn run_script(&mut self, script: &Script) -> Result<(), ScriptError> {
        let bytes = script.as_bytes();
        if bytes.len() > MAX_SCRIPT_SIZE {
            return Err(ScriptError::ScriptSize);
        }

        self.exec_stack.clear();
        self.op_count = 0;
        let mut altstack: Vec<Vec<u8>> = Vec::new();
        let mut code_separator = 0usize;
        let mut cursor = 0usize;

        while cursor < bytes.len() {
            let opcode = bytes[cursor];
            let should_execute = self.exec_stack.iter().all(|&cond| cond);

            if opcode <= all::OP_PUSHDATA4.to_u8() {
                let (start, end) =
                    push_data_range(bytes, cursor).ok_or(ScriptError::BadOpcode)?;
                if end - start > MAX_SCRIPT_ELEMENT_SIZE {
                    return Err(ScriptError::PushSize);
                }
                if should_execute {
                    let data = &bytes[start..end];
                    if self.flags.has(VERIFY_MINIMALDATA) && !is_minimal_push(opcode, data) {
                        return Err(ScriptError::MinimalData);
                    }
                    self.stack.push(data.to_vec())?;
                }
                cursor = end;
            } else {
                cursor += 1;
                let op = Opcode::from(opcode);
                if opcode > all::OP_PUSHNUM_16.to_u8() {
                    self.add_ops(1)?;
                }
                if is_disabled(op) {
                    return Err(ScriptError::DisabledOpcode);
                }
                if matches!(op, all::OP_VERIF | all::OP_VERNOTIF) {
                    return Err(ScriptError::BadOpcode);
                }

                if is_control_flow(op) {
                    self.handle_control_flow(op, should_execute)?;
                } else if should_execute {
                    if op == all::OP_CODESEPARATOR {
                        code_separator = cursor;
                    } else {
                        self.execute_opcode(&mut altstack, op, script, code_separator)?;
                    }
                }
            }

            if self.stack.len() + altstack.len() > MAX_STACK_SIZE {
                return Err(ScriptError::StackSize);
            }
        }

        if !self.exec_stack.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }

        Ok(())
    }

    fn execute_opcode(
        &mut self,
        altstack: &mut Vec<Vec<u8>>,
        op: Opcode,
        script: &Script,
        code_separator: usize,
    ) -> Result<(), ScriptError> {
        use all::*;

        let opcode = op.to_u8();
        let require_minimal = self.flags.has(VERIFY_MINIMALDATA);

        if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&opcode) {
            let value = i64::from(opcode - OP_PUSHNUM_1.to_u8() + 1);
            return self.stack.push_num(value);
        }

        let stack = &mut self.stack;
        match op {
            OP_PUSHNUM_NEG1 => stack.push_num(-1)?,
            OP_NOP => {}
            OP_NOP1 | OP_NOP4 | OP_NOP5 | OP_NOP6 | OP_NOP7 | OP_NOP8 | OP_NOP9 | OP_NOP10 => {
                if self.flags.has(VERIFY_DISCOURAGE_UPGRADABLE_NOPS) {
                    return Err(ScriptError::DiscourageUpgradableNops);
                }
            }
            OP_CLTV => {
                if self.flags.has(VERIFY_CHECKLOCKTIMEVERIFY) {
                    let locktime =
                        parse_scriptnum(stack.top(1)?, require_minimal, SCRIPTNUM_MAX_LEN_EXTENDED)?;
                    if locktime < 0 {
                        return Err(ScriptError::NegativeLockTime);
                    }
                    self.check_lock_time(locktime)?;
                }
            }
            OP_CSV => {
                if self.flags.has(VERIFY_CHECKSEQUENCEVERIFY) {
                    let sequence =
                        parse_scriptnum(stack.top(1)?, require_minimal, SCRIPTNUM_MAX_LEN_EXTENDED)?;
                    if sequence < 0 {
                        return Err(ScriptError::NegativeLockTime);
                    }
                    if sequence & i64::from(SEQUENCE_LOCKTIME_DISABLE_FLAG) == 0 {
                        self.check_sequence(sequence)?;
                    }
                }
            }
            OP_VERIFY => {
                if !cast_to_bool(stack.top(1)?) {
                    return Err(ScriptError::Verify);
                }
                stack.pop()?;
            }
            OP_RETURN => return Err(ScriptError::OpReturn),
            OP_TOALTSTACK => {
                let value = stack.pop()?;
                altstack.push(value);
            }
            OP_FROMALTSTACK => {
                let value = altstack
                    .pop()
                    .ok_or(ScriptError::InvalidAltstackOperation)?;
                stack.push(value)?;
            }
            OP_2DROP => {
                stack.require(2)?;
                stack.pop()?;
                stack.pop()?;
            }
            OP_2DUP => {
                stack.require(2)?;
                let first = stack.top(2)?.to_vec();
                let second = stack.top(1)?.to_vec();
                stack.push(first)?;
                stack.push(second)?;
            }
            OP_3DUP => {
                stack.require(3)?;
                let first = stack.top(3)?.to_vec();
                let second = stack.top(2)?.to_vec();
                let third = stack.top(1)?.to_vec();
                stack.push(first)?;
                stack.push(second)?;
                stack.push(third)?;
            }
            OP_2OVER => {
                stack.require(4)?;
                let first = stack.top(4)?.to_vec();
                let second = stack.top(3)?.to_vec();
                stack.push(first)?;
                stack.push(second)?;
            }
            OP_2ROT => {
                stack.require(6)?;
                let len = stack.len();
                let moved: Vec<Vec<u8>> = stack.items.drain(len - 6..len - 4).collect();
                for item in moved {
                    stack.push(item)?;
                }
            }
            OP_2SWAP => {
                stack.require(4)?;
                let len = stack.len();
                stack.items.swap(len - 4, len - 2);
                stack.items.swap(len - 3, len - 1);
            }
            OP_IFDUP => {
                let value = stack.top(1)?.to_vec();
                if cast_to_bool(&value) {
                    stack.push(value)?;
                }
            }
            OP_DEPTH => {
                let depth = stack.len() as i64;
                stack.push_num(depth)?;
            }
            OP_DROP => {
                stack.pop()?;
            }
            OP_DUP => {
                let value = stack.top(1)?.to_vec();
                stack.push(value)?;
            }
            OP_NIP => {
                stack.require(2)?;
                let idx = stack.len() - 2;
                stack.items.remove(idx);
            }
            OP_OVER => {
                let value = stack.top(2)?.to_vec();
                stack.push(value)?;
            }
            OP_PICK | OP_ROLL => {
                stack.require(2)?;
                let depth = parse_scriptnum(&stack.pop()?, require_minimal, SCRIPTNUM_MAX_LEN)?;
                if depth < 0 || depth as usize >= stack.len() {
                    return Err(ScriptError::InvalidStackOperation);
                }
                let idx = stack.len() - 1 - depth as usize;
                let value = if op == OP_ROLL {
                    stack.items.remove(idx)
                } else {
                    stack.items[idx].clone()
                };
                stack.push(value)?;
            }
            OP_ROT => {
                stack.require(3)?;
                let len = stack.len();
                stack.items.swap(len - 3, len - 2);
                stack.items.swap(len - 2, len - 1);
            }
            OP_SWAP => {
                stack.require(2)?;
                let len = stack.len();
                stack.items.swap(len - 2, len - 1);
            }
            OP_TUCK => {
                stack.require(2)?;
                let len = stack.len();
                let value = stack.items[len - 1].clone();
                stack.items.insert(len - 2, value);
            }
            OP_SIZE => {
                let size = stack.top(1)?.len() as i64;
                stack.push_num(size)?;
            }
            OP_EQUAL | OP_EQUALVERIFY => {
                stack.require(2)?;
                let a = stack.pop()?;
                let b = stack.pop()?;
                let equal = a == b;
                if op == OP_EQUALVERIFY {
                    if !equal {
                        return Err(ScriptError::EqualVerify);
                    }
                } else {
                    stack.push_bool(equal)?;
                }
            }
            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                let num = parse_scriptnum(&stack.pop()?, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let result = match op {
                    OP_1ADD => num + 1,
                    OP_1SUB => num - 1,
                    OP_NEGATE => -num,
                    OP_ABS => num.abs(),
                    OP_NOT => i64::from(num == 0),
                    _ => i64::from(num != 0),
                };
                stack.push_num(result)?;
            }
            OP_ADD
            | OP_SUB
            | OP_BOOLAND
            | OP_BOOLOR
            | OP_NUMEQUAL
            | OP_NUMEQUALVERIFY
            | OP_NUMNOTEQUAL
            | OP_LESSTHAN
            | OP_GREATERTHAN
            | OP_LESSTHANOREQUAL
            | OP_GREATERTHANOREQUAL
            | OP_MIN
            | OP_MAX => {
                stack.require(2)?;
                let b = parse_scriptnum(&stack.pop()?, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let a = parse_scriptnum(&stack.pop()?, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let result = match op {
                    OP_ADD => a + b,
                    OP_SUB => a - b,
                    OP_BOOLAND => i64::from(a != 0 && b != 0),
                    OP_BOOLOR => i64::from(a != 0 || b != 0),
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => i64::from(a == b),
                    OP_NUMNOTEQUAL => i64::from(a != b),
                    OP_LESSTHAN => i64::from(a < b),
                    OP_GREATERTHAN => i64::from(a > b),
                    OP_LESSTHANOREQUAL => i64::from(a <= b),
                    OP_GREATERTHANOREQUAL => i64::from(a >= b),
                    OP_MIN => a.min(b),
                    _ => a.max(b),
                };
                if op == OP_NUMEQUALVERIFY {
                    if result == 0 {
                        return Err(ScriptError::NumEqualVerify);
                    }
                } else {
                    stack.push_num(result)?;
                }
            }
            OP_WITHIN => {
                stack.require(3)?;
                let max = parse_scriptnum(&stack.pop()?, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let min = parse_scriptnum(&stack.pop()?, require_minimal, SCRIPTNUM_MAX_LEN)?;
                let value = parse_scriptnum(&stack.pop()?, require_minimal, SCRIPTNUM_MAX_LEN)?;
                stack.push_bool(min <= value && value < max)?;
            }
            OP_RIPEMD160 | OP_SHA1 | OP_SHA256 | OP_HASH160 | OP_HASH256 => {
                let data = stack.pop()?;
                let digest = match op {
                    OP_RIPEMD160 => ripemd160::Hash::hash(&data).to_byte_array().to_vec(),
                    OP_SHA1 => sha1::Hash::hash(&data).to_byte_array().to_vec(),
                    OP_SHA256 => sha256::Hash::hash(&data).to_byte_array().to_vec(),
                    OP_HASH160 => hash160::Hash::hash(&data).to_byte_array().to_vec(),
                    _ => sha256d::Hash::hash(&data).to_byte_array().to_vec(),
                };
                stack.push(digest)?;
            }
            OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                let success = self.op_checksig(script, code_separator)?;
                if op == OP_CHECKSIGVERIFY {
                    if !success {
                        return Err(ScriptError::CheckSigVerify);
                    }
                } else {
                    self.stack.push_bool(success)?;
                }
            }
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let success = self.op_checkmultisig(script, code_separator)?;
                if op == OP_CHECKMULTISIGVERIFY {
                    if !success {
                        return Err(ScriptError::CheckMultiSigVerify);
                    }
                } else {
                    self.stack.push_bool(success)?;
                }
            }
            _ => return Err(ScriptError::BadOpcode),
        }

        Ok(())
    }

    fn handle_control_flow(&mut self, op: Opcode, should_execute: bool) -> Result<(), ScriptError> {
        use all::*;

        match op {
            OP_IF | OP_NOTIF => {
                let mut value = false;
                if should_execute {
                    let condition = self
                        .stack
                        .pop()
                        .map_err(|_| ScriptError::UnbalancedConditional)?;
                    if self.sigversion == SigVersion::WitnessV0
                        && self.flags.has(VERIFY_MINIMALIF)
                        && !is_minimal_if_condition(&condition)
                    {
                        return Err(ScriptError::MinimalIf);
                    }
                    value = cast_to_bool(&condition);
                    if op == OP_NOTIF {
                        value = !value;
                    }
                }
                self.exec_stack.push(value);
            }
            OP_ELSE => {
                let Some(top) = self.exec_stack.last_mut() else {
                    return Err(ScriptError::UnbalancedConditional);
                };
                *top = !*top;
            }
            OP_ENDIF => {
                if self.exec_stack.pop().is_none() {
                    return Err(ScriptError::UnbalancedConditional);
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Verifies the signature on top of the stack without popping; returns the success bit.
    fn op_checksig(&mut self, script: &Script, code_separator: usize) -> Result<bool, ScriptError> {
        self.stack.require(2)?;
        let sig = self.stack.top(2)?.to_vec();
        let pubkey = self.stack.top(1)?.to_vec();

        let mut script_code = script.as_bytes()[code_separator..].to_vec();
        if self.sigversion == SigVersion::Base {
            script_code = find_and_delete(&script_code, single_push_script(&sig)?.as_bytes()).0;
        }

        self.check_signature_encoding(&sig)?;
        self.check_pubkey_encoding(&pubkey)?;
        let success = self.check_sig(&sig, &pubkey, &script_code)?;
        if !success && self.flags.has(VERIFY_NULLFAIL) && !sig.is_empty() {
            return Err(ScriptError::NullFail);
        }

        self.stack.pop()?;
        self.stack.pop()?;
        Ok(success)
    }

    /// Stack positions count from the top (1). Keys and signatures are matched in order, as
    /// Bitcoin Core does, and every consumed element including the dummy is popped.
    fn op_checkmultisig(
        &mut self,
        script: &Script,
        code_separator: usize,
    ) -> Result<bool, ScriptError> {
        let require_minimal = self.flags.has(VERIFY_MINIMALDATA);

        let mut i = 1usize;
        self.stack.require(i)?;
        let keys_count = parse_scriptnum(self.stack.top(i)?, require_minimal, SCRIPTNUM_MAX_LEN)?;
        if keys_count < 0 || keys_count as usize > MAX_PUBKEYS_PER_MULTISIG {
            return Err(ScriptError::PubkeyCount);
        }
        let mut keys_count = keys_count as usize;
        self.add_ops(keys_count)?;
        i += 1;
        let mut ikey = i;
        // Position of the last key; signatures above it are checked for NULLFAIL on cleanup.
        let mut ikey2 = keys_count + 2;
        i += keys_count;
        self.stack.require(i)?;

        let sigs_count = parse_scriptnum(self.stack.top(i)?, require_minimal, SCRIPTNUM_MAX_LEN)?;
        if sigs_count < 0 || sigs_count as usize > keys_count {
            return Err(ScriptError::SigCount);
        }
        let mut sigs_count = sigs_count as usize;
        i += 1;
        let mut isig = i;
        i += sigs_count;
        self.stack.require(i)?;

        let mut script_code = script.as_bytes()[code_separator..].to_vec();
        if self.sigversion == SigVersion::Base {
            for k in 0..sigs_count {
                let pattern = single_push_script(self.stack.top(isig + k)?)?;
                script_code = find_and_delete(&script_code, pattern.as_bytes()).0;
            }
        }

        let mut success = true;
        while success && sigs_count > 0 {
            let sig = self.stack.top(isig)?.to_vec();
            let pubkey = self.stack.top(ikey)?.to_vec();
            self.check_signature_encoding(&sig)?;
            self.check_pubkey_encoding(&pubkey)?;

            if self.check_sig(&sig, &pubkey, &script_code)? {
                isig += 1;
                sigs_count -= 1;
            }
            ikey += 1;
            keys_count -= 1;

            if sigs_count > keys_count {
                success = false;
            }
        }

        let enforce_nullfail = self.flags.has(VERIFY_NULLFAIL);
        for _ in 1..i {
            if !success && enforce_nullfail && ikey2 == 0 && !self.stack.top(1)?.is_empty() {
                return Err(ScriptError::NullFail);
            }
            ikey2 = ikey2.saturating_sub(1);
            self.stack.pop()?;
        }

        let dummy = self.stack.pop()?;
        if self.flags.has(VERIFY_NULLDUMMY) && !dummy.is_empty() {
            return Err(ScriptError::SigNullDummy);
        }

        Ok(success)
    }

    fn check_lock_time(&self, locktime: i64) -> Result<(), ScriptError> {
        let tx_lock = i64::from(self.tx.lock_time.to_consensus_u32());
        let threshold = i64::from(LOCK_TIME_THRESHOLD);
        if (tx_lock < threshold) != (locktime < threshold) {
            return Err(ScriptError::UnsatisfiedLockTime);
        }
        if locktime > tx_lock {
            return Err(ScriptError::UnsatisfiedLockTime);
        }
        if self.tx.input[self.input_index].sequence == Sequence::MAX {
            return Err(ScriptError::UnsatisfiedLockTime);
        }
        Ok(())
    }

    fn check_sequence(&self, sequence: i64) -> Result<(), ScriptError> {
        if (self.tx.version.0 as u32) < 2 {
            return Err(ScriptError::UnsatisfiedLockTime);
        }

        let tx_sequence = self.tx.input[self.input_index].sequence.to_consensus_u32();
        if tx_sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            return Err(ScriptError::UnsatisfiedLockTime);
        }

        let mask = SEQUENCE_LOCKTIME_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK;
        let tx_masked = tx_sequence & mask;
        let seq_masked = (sequence as u32) & mask;
        let same_type = (tx_masked < SEQUENCE_LOCKTIME_TYPE_FLAG)
            == (seq_masked < SEQUENCE_LOCKTIME_TYPE_FLAG);
        if !same_type || seq_masked > tx_masked {
            return Err(ScriptError::UnsatisfiedLockTime);
        }
        Ok(())
    }

    fn check_signature_encoding(&self, sig: &[u8]) -> Result<(), ScriptError> {
        if sig.is_empty() {
            return Ok(());
        }
        if self.flags.has(VERIFY_DERSIG | VERIFY_LOW_S | VERIFY_STRICTENC)
            && !is_valid_signature_encoding(sig)
        {
            return Err(ScriptError::SigDer);
        }
        if self.flags.has(VERIFY_LOW_S) && !is_low_der_signature(sig) {
            return Err(ScriptError::SigHighS);
        }
        if self.flags.has(VERIFY_STRICTENC) && !is_defined_hashtype_signature(sig) {
            return Err(ScriptError::SigHashType);
        }
        Ok(())
    }

    fn check_pubkey_encoding(&self, pubkey: &[u8]) -> Result<(), ScriptError> {
        if self.flags.has(VERIFY_STRICTENC) && !is_valid_pubkey_encoding(pubkey) {
            return Err(ScriptError::PubkeyType);
        }
        if self.sigversion == SigVersion::WitnessV0
            && self.flags.has(VERIFY_WITNESS_PUBKEYTYPE)
            && !is_compressed_pubkey(pubkey)
        {
            return Err(ScriptError::WitnessPubkeyType);
        }
        Ok(())
    }

    /// ECDSA check of `sig` (DER plus hash type byte) against `script_code`.
    fn check_sig(
        &mut self,
        sig: &[u8],
        pubkey: &[u8],
        script_code: &[u8],
    ) -> Result<bool, ScriptError> {
        let Ok(pubkey) = PublicKey::from_slice(pubkey) else {
            return Ok(false);
        };
        let Some((&hash_type, der)) = sig.split_last() else {
            return Ok(false);
        };
        let Ok(mut signature) = EcdsaSignature::from_der_lax(der) else {
            return Ok(false);
        };
        signature.normalize_s();

        let message = match self.sigversion {
            SigVersion::Base => {
                let script_code = strip_code_separators(script_code);
                let sighash = self
                    .sighash_cache
                    .legacy_signature_hash(
                        self.input_index,
                        Script::from_bytes(&script_code),
                        u32::from(hash_type),
                    )
                    .map_err(|_| ScriptError::Unknown)?;
                <Message as From<_>>::from(sighash)
            }
            SigVersion::WitnessV0 => {
                // The midstate hashes only depend on the base type and the anyone-can-pay bit,
                // which `from_consensus` keeps. The trailing nHashType must commit the raw byte.
                let mut preimage = Vec::new();
                self.sighash_cache
                    .segwit_v0_encode_signing_data_to(
                        &mut preimage,
                        self.input_index,
                        Script::from_bytes(script_code),
                        self.value,
                        EcdsaSighashType::from_consensus(u32::from(hash_type)),
                    )
                    .map_err(|_| ScriptError::Unknown)?;
                let trailer = preimage.len().checked_sub(4).ok_or(ScriptError::Unknown)?;
                preimage[trailer..].copy_from_slice(&u32::from(hash_type).to_le_bytes());
                <Message as From<_>>::from(SegwitV0Sighash::hash(&preimage))
            }
        };

        Ok(with_secp256k1_verification_ctx(|secp| {
            secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
        }))
    }
}

/// Counts signature operations in `script`, stopping at the first malformed push.
///
/// With `accurate`, a multisig preceded by `OP_1`..`OP_16` counts that many keys; otherwise
/// every multisig counts as twenty.
pub fn count_sigops(script: &Script, accurate: bool) -> u32 {
    use all::*;

    let mut total: u32 = 0;
    let mut last_op: Option<Opcode> = None;
    for instruction in script.instructions() {
        let Ok(instruction) = instruction else {
            break;
        };
        match instruction {
            Instruction::Op(opcode) => {
                match opcode {
                    OP_CHECKSIG | OP_CHECKSIGVERIFY => total = total.saturating_add(1),
                    OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                        let keys = match decode_op_n(last_op) {
                            Some(n) if accurate => n,
                            _ => MAX_PUBKEYS_PER_MULTISIG as u32,
                        };
                        total = total.saturating_add(keys);
                    }
                    _ => {}
                }
                last_op = Some(opcode);
            }
            Instruction::PushBytes(_) => {
                last_op = None;
            }
        }
    }

    total
}

fn decode_op_n(opcode: Option<Opcode>) -> Option<u32> {
    let value = opcode?.to_u8();
    let first = all::OP_PUSHNUM_1.to_u8();
    if (first..=all::OP_PUSHNUM_16.to_u8()).contains(&value) {
        Some(u32::from(value - first + 1))
    } else {
        None
    }
}

fn cast_to_bool(data: &[u8]) -> bool {
    for (i, &byte) in data.iter().enumerate() {
        if byte != 0 {
            // Negative zero.
            return !(i == data.len() - 1 && byte == 0x80);
        }
    }
    false
}

fn encode_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }

    let mut result = Vec::new();
    let mut abs_value = value.unsigned_abs();
    while abs_value > 0 {
        result.push((abs_value & 0xff) as u8);
        abs_value >>= 8;
    }

    if let Some(last) = result.last_mut() {
        if *last & 0x80 != 0 {
            result.push(if value < 0 { 0x80 } else { 0x00 });
        } else if value < 0 {
            *last |= 0x80;
        }
    }

    result
}

/// Script number decoding failures map to `Unknown`, matching Core's `scriptnum_error`.
fn parse_scriptnum(bytes: &[u8], minimal: bool, max_len: usize) -> Result<i64, ScriptError> {
    if bytes.len() > max_len {
        return Err(ScriptError::Unknown);
    }
    if minimal && !is_minimally_encoded(bytes) {
        return Err(ScriptError::Unknown);
    }
    Ok(decode_num(bytes))
}

fn decode_num(bytes: &[u8]) -> i64 {
    let Some(&last) = bytes.last() else {
        return 0;
    };

    let mut result: i64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        result |= i64::from(byte) << (8 * i);
    }

    if last & 0x80 != 0 {
        let mask = !(0x80i64 << (8 * (bytes.len() - 1)));
        -(result & mask)
    } else {
        result
    }
}

fn is_minimally_encoded(bytes: &[u8]) -> bool {
    match bytes {
        [] => true,
        [.., last] if last & 0x7f != 0 => true,
        [_] => false,
        [.., prev, _] => prev & 0x80 != 0,
    }
}

fn is_disabled(op: Opcode) -> bool {
    use all::*;

    matches!(
        op,
        OP_CAT
            | OP_SUBSTR
            | OP_LEFT
            | OP_RIGHT
            | OP_INVERT
            | OP_AND
            | OP_OR
            | OP_XOR
            | OP_2MUL
            | OP_2DIV
            | OP_MUL
            | OP_DIV
            | OP_MOD
            | OP_LSHIFT
            | OP_RSHIFT
    )
}

fn is_control_flow(op: Opcode) -> bool {
    use all::*;

    matches!(op, OP_IF | OP_NOTIF | OP_ELSE | OP_ENDIF)
}

fn is_minimal_if_condition(data: &[u8]) -> bool {
    data.is_empty() || data == [1]
}

fn is_minimal_push(opcode: u8, data: &[u8]) -> bool {
    use all::*;

    match data {
        [] => opcode == OP_PUSHBYTES_0.to_u8(),
        [value @ 1..=16] => opcode == OP_PUSHNUM_1.to_u8() + value - 1,
        [0x81] => opcode == OP_PUSHNUM_NEG1.to_u8(),
        _ if data.len() <= 75 => opcode as usize == data.len(),
        _ if data.len() <= 0xff => opcode == OP_PUSHDATA1.to_u8(),
        _ if data.len() <= 0xffff => opcode == OP_PUSHDATA2.to_u8(),
        _ => true,
    }
}

/// Data range of the instruction at `pos`, or `None` when the push runs past the end.
///
/// Non-push opcodes yield an empty range just past the opcode.
fn push_data_range(bytes: &[u8], pos: usize) -> Option<(usize, usize)> {
    let opcode = bytes[pos];
    let mut cursor = pos + 1;
    let len = match opcode {
        0x00..=0x4b => usize::from(opcode),
        0x4c => read_push_length(bytes, &mut cursor, 1)?,
        0x4d => read_push_length(bytes, &mut cursor, 2)?,
        0x4e => read_push_length(bytes, &mut cursor, 4)?,
        _ => 0,
    };
    let end = cursor.checked_add(len).filter(|end| *end <= bytes.len())?;
    Some((cursor, end))
}

fn read_push_length(bytes: &[u8], index: &mut usize, width: usize) -> Option<usize> {
    let raw = bytes.get(*index..*index + width)?;
    *index += width;
    Some(
        raw.iter()
            .enumerate()
            .fold(0usize, |len, (i, &byte)| len | (usize::from(byte) << (8 * i))),
    )
}

fn single_push_script(data: &[u8]) -> Result<ScriptBuf, ScriptError> {
    let push = PushBytesBuf::try_from(data.to_vec()).map_err(|_| ScriptError::PushSize)?;
    Ok(Builder::new().push_slice(push).into_script())
}

/// Removes every occurrence of `pattern` that starts on an instruction boundary.
fn find_and_delete(script: &[u8], pattern: &[u8]) -> (Vec<u8>, usize) {
    if pattern.is_empty() {
        return (script.to_vec(), 0);
    }

    let mut result = Vec::with_capacity(script.len());
    let mut found = 0usize;
    let mut pc = 0usize;
    let mut kept_from = 0usize;
    loop {
        result.extend_from_slice(&script[kept_from..pc]);
        while script[pc..].starts_with(pattern) {
            pc += pattern.len();
            found += 1;
        }
        kept_from = pc;
        if pc >= script.len() {
            break;
        }
        match push_data_range(script, pc) {
            Some((_, end)) => pc = end,
            None => break,
        }
    }

    if found == 0 {
        return (script.to_vec(), 0);
    }
    result.extend_from_slice(&script[kept_from..]);
    (result, found)
}

/// Drops `OP_CODESEPARATOR`s from a legacy script code; bytes after a malformed push are kept.
fn strip_code_separators(script: &[u8]) -> Vec<u8> {
    let separator = all::OP_CODESEPARATOR.to_u8();
    let mut stripped = Vec::with_capacity(script.len());
    let mut kept_from = 0usize;
    let mut pc = 0usize;
    while pc < script.len() {
        let Some((_, end)) = push_data_range(script, pc) else {
            break;
        };
        if script[pc] == separator {
            stripped.extend_from_slice(&script[kept_from..pc]);
            kept_from = end;
        }
        pc = end;
    }
    stripped.extend_from_slice(&script[kept_from..]);
    stripped
}

fn is_valid_signature_encoding(sig: &[u8]) -> bool {
    if sig.len() < 9 || sig.len() > 73 {
        return false;
    }
    if sig[0] != 0x30 {
        return false;
    }
    if sig[1] as usize != sig.len() - 3 {
        return false;
    }

    let len_r = sig[3] as usize;
    if 5 + len_r >= sig.len() {
        return false;
    }
    let len_s = sig[5 + len_r] as usize;
    if len_r + len_s + 7 != sig.len() {
        return false;
    }

    if sig[2] != 0x02 || len_r == 0 || sig[4] & 0x80 != 0 {
        return false;
    }
    if len_r > 1 && sig[4] == 0x00 && (sig[5] & 0x80) == 0 {
        return false;
    }

    if sig[len_r + 4] != 0x02 || len_s == 0 || sig[len_r + 6] & 0x80 != 0 {
        return false;
    }
    if len_s > 1 && sig[len_r + 6] == 0x00 && (sig[len_r + 7] & 0x80) == 0 {
        return false;
    }
    true
}

fn is_defined_hashtype_signature(sig: &[u8]) -> bool {
    let Some(&last) = sig.last() else {
        return false;
    };
    matches!(last & !0x80, 0x01..=0x03)
}

fn is_low_der_signature(sig: &[u8]) -> bool {
    let Some((_, der)) = sig.split_last() else {
        return false;
    };
    let Ok(signature) = EcdsaSignature::from_der_lax(der) else {
        return false;
    };
    let mut normalized = signature;
    normalized.normalize_s();
    normalized == signature
}

fn is_valid_pubkey_encoding(pubkey: &[u8]) -> bool {
    match pubkey.len() {
        33 => matches!(pubkey[0], 0x02 | 0x03),
        65 => pubkey[0] == 0x04,
        _ => false,
    }
}

fn is_compressed_pubkey(pubkey: &[u8]) -> bool {
    pubkey.len() == 33 && matches!(pubkey[0], 0x02 | 0x03)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{
        absolute::LockTime, transaction::Version, OutPoint, ScriptBuf, TxIn, TxOut, Witness,
    };

    fn spending_tx(version: i32, sequence: Sequence, lock_time: LockTime) -> Transaction {
        Transaction {
            version: Version(version),
            lock_time,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    fn run(
        tx: &Transaction,
        script: ScriptBuf,
        flags: u32,
        stack: Vec<Vec<u8>>,
        version: ScriptVersion,
    ) -> Result<bool, ScriptError> {
        let flags = ScriptFlags::from_bits(flags).expect("flags");
        let mut program = Program::new(script, tx, 0, flags, stack, Amount::ZERO, version);
        program.evaluate()?;
        Ok(program.stack_result(true))
    }

    fn base_tx() -> Transaction {
        spending_tx(2, Sequence::ZERO, LockTime::ZERO)
    }

    #[test]
    fn rejects_unknown_flags() {
        let invalid_bit = 1 << 31;
        let err = ScriptFlags::from_bits(invalid_bit).expect_err("invalid flag");
        assert_eq!(err, Error::InvalidFlags);
    }

    #[test]
    fn flag_roundtrip_without_implied_bits_is_lossless() {
        let bits = VERIFY_P2SH | VERIFY_STRICTENC | VERIFY_DERSIG;
        let flags = ScriptFlags::from_bits(bits).unwrap();
        assert_eq!(flags.bits(), bits);
    }

    #[test]
    fn witness_flag_implies_p2sh() {
        let flags = ScriptFlags::from_bits(VERIFY_WITNESS).unwrap();
        assert_eq!(flags.bits(), VERIFY_WITNESS | VERIFY_P2SH);
        assert!(flags.has(VERIFY_P2SH));
    }

    #[test]
    fn arithmetic_and_equality() {
        let script = Builder::new()
            .push_int(2)
            .push_int(3)
            .push_opcode(all::OP_ADD)
            .push_int(5)
            .push_opcode(all::OP_NUMEQUAL)
            .into_script();
        assert_eq!(run(&base_tx(), script, 0, vec![], ScriptVersion::Unversioned), Ok(true));
    }

    #[test]
    fn stack_result_requires_clean_stack_only_when_asked() {
        let tx = base_tx();
        let flags = ScriptFlags::from_bits(0).unwrap();
        let script = Builder::new().push_int(1).push_int(1).into_script();
        let mut program =
            Program::new(script, &tx, 0, flags, vec![], Amount::ZERO, ScriptVersion::Zero);
        program.evaluate().unwrap();
        assert!(program.stack_result(false));
        assert!(!program.stack_result(true));
        assert_eq!(program.stack().len(), 2);
    }

    #[test]
    fn negative_zero_is_false() {
        let tx = base_tx();
        let flags = ScriptFlags::from_bits(0).unwrap();
        let program = Program::new(
            ScriptBuf::new(),
            &tx,
            0,
            flags,
            vec![vec![0x00, 0x80]],
            Amount::ZERO,
            ScriptVersion::Zero,
        );
        assert!(!program.stack_result(true));
    }

    #[test]
    fn if_else_selects_branch() {
        let script = Builder::new()
            .push_opcode(all::OP_IF)
            .push_int(0)
            .push_opcode(all::OP_ELSE)
            .push_int(1)
            .push_opcode(all::OP_ENDIF)
            .into_script();
        let result = run(&base_tx(), script, 0, vec![vec![]], ScriptVersion::Unversioned);
        assert_eq!(result, Ok(true));
    }

    #[test]
    fn minimal_if_applies_to_witness_v0_only() {
        let script = Builder::new()
            .push_opcode(all::OP_IF)
            .push_int(1)
            .push_opcode(all::OP_ENDIF)
            .into_script();
        let stack = vec![vec![0x02]];
        assert_eq!(
            run(&base_tx(), script.clone(), VERIFY_MINIMALIF, stack.clone(), ScriptVersion::Zero),
            Err(ScriptError::MinimalIf)
        );
        assert_eq!(
            run(&base_tx(), script, VERIFY_MINIMALIF, stack, ScriptVersion::Unversioned),
            Ok(true)
        );
    }

    #[test]
    fn unbalanced_conditional_fails() {
        let script = Builder::new().push_int(1).push_opcode(all::OP_IF).into_script();
        assert_eq!(
            run(&base_tx(), script, 0, vec![], ScriptVersion::Unversioned),
            Err(ScriptError::UnbalancedConditional)
        );
    }

    #[test]
    fn disabled_opcode_fails_in_unexecuted_branch() {
        let script = Builder::new()
            .push_int(0)
            .push_opcode(all::OP_IF)
            .push_opcode(all::OP_CAT)
            .push_opcode(all::OP_ENDIF)
            .push_int(1)
            .into_script();
        assert_eq!(
            run(&base_tx(), script, 0, vec![], ScriptVersion::Unversioned),
            Err(ScriptError::DisabledOpcode)
        );
    }

    #[test]
    fn op_return_fails() {
        let script = Builder::new().push_opcode(all::OP_RETURN).into_script();
        assert_eq!(
            run(&base_tx(), script, 0, vec![vec![1]], ScriptVersion::Unversioned),
            Err(ScriptError::OpReturn)
        );
    }

    #[test]
    fn op_count_limit() {
        let mut builder = Builder::new().push_int(1);
        for _ in 0..=MAX_OPS_PER_SCRIPT {
            builder = builder.push_opcode(all::OP_NOP);
        }
        assert_eq!(
            run(&base_tx(), builder.into_script(), 0, vec![], ScriptVersion::Unversioned),
            Err(ScriptError::OpCount)
        );
    }

    #[test]
    fn witness_v0_initial_stack_limits() {
        let script = Builder::new().push_int(1).into_script();
        assert_eq!(
            run(
                &base_tx(),
                script.clone(),
                0,
                vec![vec![]; MAX_STACK_SIZE + 1],
                ScriptVersion::Zero
            ),
            Err(ScriptError::StackSize)
        );
        assert_eq!(
            run(
                &base_tx(),
                script,
                0,
                vec![vec![0; MAX_SCRIPT_ELEMENT_SIZE + 1]],
                ScriptVersion::Zero
            ),
            Err(ScriptError::PushSize)
        );
    }

    #[test]
    fn oversized_script_is_rejected() {
        let script = ScriptBuf::from_bytes(vec![all::OP_NOP.to_u8(); MAX_SCRIPT_SIZE + 1]);
        assert_eq!(
            run(&base_tx(), script, 0, vec![], ScriptVersion::Zero),
            Err(ScriptError::ScriptSize)
        );
    }

    #[test]
    fn truncated_push_is_bad_opcode() {
        let script = ScriptBuf::from_bytes(vec![0x4c, 0x05, 0x01]);
        assert_eq!(
            run(&base_tx(), script, 0, vec![], ScriptVersion::Zero),
            Err(ScriptError::BadOpcode)
        );
    }

    #[test]
    fn minimal_data_rejects_non_minimal_push() {
        let script = ScriptBuf::from_bytes(vec![0x01, 0x05]);
        assert_eq!(
            run(&base_tx(), script.clone(), VERIFY_MINIMALDATA, vec![], ScriptVersion::Zero),
            Err(ScriptError::MinimalData)
        );
        assert_eq!(run(&base_tx(), script, 0, vec![], ScriptVersion::Zero), Ok(true));
    }

    #[test]
    fn csv_requires_version_two() {
        let script = Builder::new()
            .push_int(1)
            .push_opcode(all::OP_CSV)
            .into_script();
        let v1 = spending_tx(1, Sequence::from_consensus(5), LockTime::ZERO);
        let v2 = spending_tx(2, Sequence::from_consensus(5), LockTime::ZERO);
        assert_eq!(
            run(&v1, script.clone(), VERIFY_CHECKSEQUENCEVERIFY, vec![], ScriptVersion::Zero),
            Err(ScriptError::UnsatisfiedLockTime)
        );
        assert_eq!(
            run(&v2, script.clone(), VERIFY_CHECKSEQUENCEVERIFY, vec![], ScriptVersion::Zero),
            Ok(true)
        );
        // Without the flag the opcode is a NOP.
        assert_eq!(run(&v1, script, 0, vec![], ScriptVersion::Zero), Ok(true));
    }

    #[test]
    fn cltv_checks_lock_time_and_sequence() {
        let script = Builder::new()
            .push_int(100)
            .push_opcode(all::OP_CLTV)
            .into_script();
        let flags = VERIFY_CHECKLOCKTIMEVERIFY;
        let satisfied = spending_tx(2, Sequence::ZERO, LockTime::from_consensus(100));
        let too_early = spending_tx(2, Sequence::ZERO, LockTime::from_consensus(99));
        let final_seq = spending_tx(2, Sequence::MAX, LockTime::from_consensus(100));
        assert_eq!(
            run(&satisfied, script.clone(), flags, vec![], ScriptVersion::Zero),
            Ok(true)
        );
        assert_eq!(
            run(&too_early, script.clone(), flags, vec![], ScriptVersion::Zero),
            Err(ScriptError::UnsatisfiedLockTime)
        );
        assert_eq!(
            run(&final_seq, script, flags, vec![], ScriptVersion::Zero),
            Err(ScriptError::UnsatisfiedLockTime)
        );
    }

    #[test]
    fn negative_lock_time_is_rejected() {
        let script = Builder::new()
            .push_int(-1)
            .push_opcode(all::OP_CLTV)
            .into_script();
        assert_eq!(
            run(&base_tx(), script, VERIFY_CHECKLOCKTIMEVERIFY, vec![], ScriptVersion::Zero),
            Err(ScriptError::NegativeLockTime)
        );
    }

    #[test]
    fn upgradable_nops_are_discouraged_on_request() {
        let script = Builder::new()
            .push_opcode(all::OP_NOP10)
            .push_int(1)
            .into_script();
        assert_eq!(
            run(
                &base_tx(),
                script.clone(),
                VERIFY_DISCOURAGE_UPGRADABLE_NOPS,
                vec![],
                ScriptVersion::Zero
            ),
            Err(ScriptError::DiscourageUpgradableNops)
        );
        assert_eq!(run(&base_tx(), script, 0, vec![], ScriptVersion::Zero), Ok(true));
    }

    #[test]
    fn multisig_zero_of_zero_consumes_dummy() {
        let script = Builder::new()
            .push_int(0)
            .push_int(0)
            .push_opcode(all::OP_CHECKMULTISIG)
            .into_script();
        assert_eq!(
            run(&base_tx(), script.clone(), VERIFY_NULLDUMMY, vec![vec![]], ScriptVersion::Zero),
            Ok(true)
        );
        assert_eq!(
            run(&base_tx(), script, VERIFY_NULLDUMMY, vec![vec![1]], ScriptVersion::Zero),
            Err(ScriptError::SigNullDummy)
        );
    }

    #[test]
    fn multisig_without_dummy_fails() {
        let script = Builder::new()
            .push_int(0)
            .push_int(0)
            .push_opcode(all::OP_CHECKMULTISIG)
            .into_script();
        assert_eq!(
            run(&base_tx(), script, 0, vec![], ScriptVersion::Zero),
            Err(ScriptError::InvalidStackOperation)
        );
    }

    #[test]
    fn invalid_signature_with_nullfail() {
        let script = Builder::new().push_opcode(all::OP_CHECKSIG).into_script();
        let stack = vec![vec![0x01], vec![0x02; 33]];
        assert_eq!(
            run(&base_tx(), script.clone(), VERIFY_NULLFAIL, stack.clone(), ScriptVersion::Zero),
            Err(ScriptError::NullFail)
        );
        assert_eq!(run(&base_tx(), script, 0, stack, ScriptVersion::Zero), Ok(false));
    }

    #[test]
    fn witness_pubkey_type_requires_compressed_keys() {
        let script = Builder::new().push_opcode(all::OP_CHECKSIG).into_script();
        let mut uncompressed = vec![0x04];
        uncompressed.extend_from_slice(&[0x11; 64]);
        let stack = vec![vec![], uncompressed];
        assert_eq!(
            run(
                &base_tx(),
                script.clone(),
                VERIFY_WITNESS_PUBKEYTYPE,
                stack.clone(),
                ScriptVersion::Zero
            ),
            Err(ScriptError::WitnessPubkeyType)
        );
        assert_eq!(
            run(
                &base_tx(),
                script,
                VERIFY_WITNESS_PUBKEYTYPE,
                stack,
                ScriptVersion::Unversioned
            ),
            Ok(false)
        );
    }

    #[test]
    fn input_index_out_of_range_is_unknown() {
        let tx = base_tx();
        let flags = ScriptFlags::from_bits(0).unwrap();
        let mut program = Program::new(
            ScriptBuf::new(),
            &tx,
            1,
            flags,
            vec![],
            Amount::ZERO,
            ScriptVersion::Zero,
        );
        assert_eq!(program.evaluate(), Err(ScriptError::Unknown));
    }

    #[test]
    fn sigop_counter_counts_checksig_ops() {
        let script = Builder::new()
            .push_opcode(all::OP_DUP)
            .push_opcode(all::OP_CHECKSIG)
            .push_opcode(all::OP_CHECKSIGVERIFY)
            .into_script();
        assert_eq!(count_sigops(&script, true), 2);
        assert_eq!(count_sigops(&script, false), 2);
    }

    #[test]
    fn sigop_counter_handles_multisig_precision() {
        let key1 = PushBytesBuf::try_from(vec![0x02; 33]).unwrap();
        let key2 = PushBytesBuf::try_from(vec![0x03; 33]).unwrap();
        let script = Builder::new()
            .push_opcode(all::OP_PUSHNUM_2)
            .push_slice(key1)
            .push_slice(key2)
            .push_opcode(all::OP_PUSHNUM_2)
            .push_opcode(all::OP_CHECKMULTISIG)
            .into_script();
        assert_eq!(count_sigops(&script, true), 2);
        assert_eq!(count_sigops(&script, false), MAX_PUBKEYS_PER_MULTISIG as u32);
    }

    #[test]
    fn sigop_counter_stops_at_malformed_push() {
        let script = ScriptBuf::from_bytes(vec![0xac, 0x4c, 0x05, 0xac]);
        assert_eq!(count_sigops(&script, true), 1);
    }

    #[test]
    fn find_and_delete_matches_whole_pushes() {
        let pattern = single_push_script(&[0x02, 0x03]).unwrap();
        let script = Builder::new()
            .push_slice(PushBytesBuf::try_from(vec![0x02, 0x03]).unwrap())
            .push_opcode(all::OP_ADD)
            .push_slice(PushBytesBuf::try_from(vec![0x02, 0x03]).unwrap())
            .into_script();
        let (stripped, removed) = find_and_delete(script.as_bytes(), pattern.as_bytes());
        assert_eq!(removed, 2);
        assert_eq!(stripped, vec![all::OP_ADD.to_u8()]);
    }

    #[test]
    fn find_and_delete_does_not_match_inside_pushes() {
        // The pattern appears inside the pushed data, not on an instruction boundary.
        let script = [0x03, 0x01, 0xaa, 0x51];
        let (stripped, removed) = find_and_delete(&script, &[0x01, 0xaa]);
        assert_eq!(removed, 0);
        assert_eq!(stripped, script);
    }

    #[test]
    fn strip_code_separators_keeps_pushed_bytes() {
        let script = [0xab, 0x01, 0xab, 0x51, 0xab];
        assert_eq!(strip_code_separators(&script), vec![0x01, 0xab, 0x51]);
    }

    #[test]
    fn scriptnum_overflow_maps_to_unknown() {
        let overflow = vec![0x00, 0x00, 0x00, 0x80, 0x00];
        let err = parse_scriptnum(&overflow, false, SCRIPTNUM_MAX_LEN).unwrap_err();
        assert_eq!(err, ScriptError::Unknown);
        assert!(parse_scriptnum(&overflow, false, SCRIPTNUM_MAX_LEN_EXTENDED).is_ok());
    }

    #[test]
    fn scriptnum_minimal_violation_maps_to_unknown() {
        let non_minimal = vec![0x01, 0x00];
        let err = parse_scriptnum(&non_minimal, true, SCRIPTNUM_MAX_LEN).unwrap_err();
        assert_eq!(err, ScriptError::Unknown);
        let ok = parse_scriptnum(&non_minimal, false, SCRIPTNUM_MAX_LEN).unwrap();
        assert_eq!(ok, 1);
        assert!(parse_scriptnum(&[0xff, 0x80], true, SCRIPTNUM_MAX_LEN).is_ok());
    }

    #[test]
    fn scriptnum_encoding_round_trips() {
        for value in [0i64, 1, -1, 127, 128, -128, 255, 32767, -32768, 0x7fff_ffff] {
            assert_eq!(decode_num(&encode_num(value)), value);
        }
        assert_eq!(encode_num(-1), vec![0x81]);
        assert_eq!(encode_num(128), vec![0x80, 0x00]);
    }

    #[test]
    fn signature_encoding_helpers() {
        assert!(is_defined_hashtype_signature(&[0x30, 0x81]));
        assert!(!is_defined_hashtype_signature(&[0x30, 0x21]));
        assert!(!is_defined_hashtype_signature(&[]));
        assert!(is_compressed_pubkey(&[0x02; 33]));
        assert!(!is_valid_pubkey_encoding(&[0x05; 33]));
        assert!(!is_valid_signature_encoding(&[0x30; 8]));
    }
}
