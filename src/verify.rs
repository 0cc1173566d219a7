//! Witness verification: dispatch on the commitment and map the script run to a verdict.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use bitcoin::{blockdata::script::Script, Amount, ScriptBuf, Transaction};
use log::{debug, trace};

use crate::{
    extract::{Commitment, Extraction, ScriptVersion},
    script::{Program, ScriptError, ScriptFlags},
    witness::Witness,
    Error,
};

/// Script evaluation engine driven by [`Witness::verify_with`].
pub trait ScriptMachine<'tx>: Sized {
    fn new(
        script: ScriptBuf,
        tx: &'tx Transaction,
        input_index: usize,
        flags: ScriptFlags,
        stack: Vec<Vec<u8>>,
        value: Amount,
        version: ScriptVersion,
    ) -> Self;

    fn evaluate(&mut self) -> Result<(), ScriptError>;

    fn stack_result(&self, clean: bool) -> bool;
}

impl<'tx> ScriptMachine<'tx> for Program<'tx> {
    fn new(
        script: ScriptBuf,
        tx: &'tx Transaction,
        input_index: usize,
        flags: ScriptFlags,
        stack: Vec<Vec<u8>>,
        value: Amount,
        version: ScriptVersion,
    ) -> Self {
        Program::new(script, tx, input_index, flags, stack, value, version)
    }

    fn evaluate(&mut self) -> Result<(), ScriptError> {
        Program::evaluate(self)
    }

    fn stack_result(&self, clean: bool) -> bool {
        Program::stack_result(self, clean)
    }
}

impl Witness {
    /// Verifies this witness as the spend of `program_script` by input `input_index` of `tx`.
    ///
    /// `value` is the spent output amount in satoshis.
    pub fn verify(
        &self,
        tx: &Transaction,
        input_index: usize,
        flags: ScriptFlags,
        program_script: &Script,
        value: u64,
    ) -> Result<(), Error> {
        self.verify_with::<Program<'_>>(tx, input_index, flags, program_script, value)
    }

    /// Same as [`Witness::verify`] over any [`ScriptMachine`].
    pub fn verify_with<'tx, M: ScriptMachine<'tx>>(
        &self,
        tx: &'tx Transaction,
        input_index: usize,
        flags: ScriptFlags,
        program_script: &Script,
        value: u64,
    ) -> Result<(), Error> {
        let version = Commitment::classify(program_script).version();
        trace!("verifying input {input_index} as {version:?} witness");

        match version {
            ScriptVersion::Zero => {
                if input_index >= tx.input.len() {
                    return Err(Error::TxIndex);
                }
                let Some(Extraction { script, stack }) = self.extract_script(program_script)
                else {
                    debug!("input {input_index}: witness does not satisfy its program");
                    return Err(Error::InvalidWitness);
                };

                let mut machine = M::new(
                    script,
                    tx,
                    input_index,
                    flags,
                    stack,
                    Amount::from_sat(value),
                    version,
                );
                machine.evaluate()?;
                if !machine.stack_result(true) {
                    debug!("input {input_index}: witness script left a false or unclean stack");
                    return Err(Error::StackFalse);
                }
                Ok(())
            }
            ScriptVersion::Reserved => Ok(()),
            ScriptVersion::Unversioned => Err(Error::UnversionedScript),
        }
    }
}

/// Verifies the witness carried by `tx.input[input_index]` against `program_script`.
pub fn verify_input(
    tx: &Transaction,
    input_index: usize,
    flags: ScriptFlags,
    program_script: &Script,
    value: u64,
) -> Result<(), Error> {
    let input = tx.input.get(input_index).ok_or(Error::TxIndex)?;
    Witness::from(&input.witness).verify(tx, input_index, flags, program_script, value)
}
