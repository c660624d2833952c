//! Courier programs and the binding of procedure implementations.
//!
//! A [`Program`] is identified by its program number and version and maps
//! procedure numbers to [`Procedure`]s. Implementations are plain Rust closures
//! bound with a small builder that also declares the shape of the arguments,
//! the results and the errors the procedure may raise:
//!
//! ```ignore
//! let mut program = Program::new("Time", 15, 2);
//! program
//!     .procedure::<(), TimeInfo>(0, "GetTime")
//!     .error::<TimeError>()
//!     .bind(|_, result, _| {
//!         result.time = now();
//!         Ok(())
//!     });
//! ```
//!
//! Processing a call enforces the declared shapes: arguments must decode and
//! consume the call message exactly, and only declared errors are reported as
//! aborts. Everything else ends in an "invalid arguments" reject.

use std::any::{type_name, Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};

use thiserror::Error;
use tracing::{debug, error, warn};

use super::context::{CallContext, ConnectionClient, Transaction};
use crate::protocol::courier::message::{self, RejectCode};
use crate::protocol::courier::{ErrorRecord, Serialize, Value};
use crate::protocol::wire::{BufferStream, WireError, WireResult, WireStream, SST_RPC};

/// Failure of a procedure implementation.
#[derive(Error, Debug)]
pub enum ProcedureError {
    /// Raises a Courier error; sent as an abort if the procedure declares it.
    #[error("courier abort with error code {}", .0.error_code())]
    Abort(Box<dyn ErrorRecord>),

    /// Any other failure; the caller sees an "invalid arguments" reject.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl ProcedureError {
    pub fn abort(error: impl ErrorRecord) -> Self {
        ProcedureError::Abort(Box::new(error))
    }
}

impl From<WireError> for ProcedureError {
    fn from(e: WireError) -> Self {
        ProcedureError::Failed(e.into())
    }
}

pub type ProcedureResult = Result<(), ProcedureError>;

/// A procedure that can serve calls.
pub trait Procedure: Send + Sync {
    fn number(&self) -> u16;

    fn name(&self) -> &str;

    /// Handles one call whose header has been read up to and including the
    /// procedure number. Writes exactly one reply message.
    ///
    /// # Returns
    ///
    /// A client that takes the transport over after the reply, if the
    /// implementation asked for a hand-off. Only transport failures are
    /// returned as errors.
    fn process(
        &self,
        transaction: &Transaction,
        stream: &mut dyn WireStream,
    ) -> WireResult<Option<Box<dyn ConnectionClient>>>;
}

/// Error type a procedure is allowed to raise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclaredError {
    type_id: TypeId,
    code: u16,
    name: &'static str,
}

impl DeclaredError {
    fn of<E: ErrorRecord + Default>() -> Self {
        Self { type_id: TypeId::of::<E>(), code: E::default().error_code(), name: type_name::<E>() }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Set of procedures served under one program number and version.
pub struct Program {
    name: String,
    number: u32,
    version: u16,
    procedures: BTreeMap<u16, Box<dyn Procedure>>,
}

impl Program {
    pub fn new(name: impl Into<String>, number: u32, version: u16) -> Self {
        Self { name: name.into(), number, version, procedures: BTreeMap::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    /// Starts the declaration of procedure `number` taking `P` and returning `R`.
    pub fn procedure<P: Value, R: Value>(
        &mut self,
        number: u16,
        name: impl Into<String>,
    ) -> ProcedureBuilder<'_, P, R> {
        ProcedureBuilder {
            program: self,
            number,
            name: name.into(),
            errors: Vec::new(),
            _shape: PhantomData,
        }
    }

    /// Adds a procedure, replacing one with the same number.
    pub fn insert(&mut self, procedure: impl Procedure + 'static) {
        let number = procedure.number();
        if self.procedures.insert(number, Box::new(procedure)).is_some() {
            debug!("{}: replaced procedure {}", self.name, number);
        }
    }

    pub fn has_procedure(&self, number: u16) -> bool {
        self.procedures.contains_key(&number)
    }

    /// Numbers and names of the procedures, in ascending order.
    pub fn procedures(&self) -> impl Iterator<Item = (u16, &str)> {
        self.procedures.iter().map(|(number, p)| (*number, p.name()))
    }

    /// Reads the procedure number of a call and hands the call to the procedure.
    pub fn dispatch(
        &self,
        transaction: &Transaction,
        stream: &mut dyn WireStream,
    ) -> WireResult<Option<Box<dyn ConnectionClient>>> {
        let number = stream.read_u16()?;
        let Some(procedure) = self.procedures.get(&number) else {
            warn!(
                "{}: no procedure {} in {} version {}",
                transaction.connection_id, number, self.name, self.version
            );
            stream.drop_to_end_of_message(SST_RPC)?;
            message::write_reject(stream, transaction.id, RejectCode::NoSuchProcedure, None)?;
            return Ok(None);
        };
        debug!(
            "{}: call {}.{} (transaction {})",
            transaction.connection_id,
            self.name,
            procedure.name(),
            transaction.id
        );
        procedure.process(transaction, stream)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("rpc::Program")
            .field("name", &self.name)
            .field("number", &self.number)
            .field("version", &self.version)
            .field("procedures", &self.procedures().collect::<Vec<_>>())
            .finish()
    }
}

/// Declaration of one procedure, completed by [`ProcedureBuilder::bind`].
pub struct ProcedureBuilder<'a, P, R> {
    program: &'a mut Program,
    number: u16,
    name: String,
    errors: Vec<DeclaredError>,
    _shape: PhantomData<fn() -> (P, R)>,
}

impl<P: Value, R: Value> ProcedureBuilder<'_, P, R> {
    /// Declares that the procedure may raise errors of type `E`.
    pub fn error<E: ErrorRecord + Default>(mut self) -> Self {
        self.errors.push(DeclaredError::of::<E>());
        self
    }

    /// Binds the implementation and adds the procedure to the program.
    ///
    /// The implementation receives the decoded arguments, the results to fill
    /// in (initialized with `R::default()`) and the call context.
    pub fn bind<F>(self, implementation: F)
    where
        F: Fn(&P, &mut R, &mut CallContext<'_>) -> ProcedureResult + Send + Sync + 'static,
    {
        self.program.insert(BoundProcedure {
            number: self.number,
            name: self.name,
            errors: self.errors,
            implementation,
            _shape: PhantomData::<fn() -> (P, R)>,
        });
    }
}

/// A closure bound as a procedure implementation.
pub struct BoundProcedure<P, R, F> {
    number: u16,
    name: String,
    errors: Vec<DeclaredError>,
    implementation: F,
    _shape: PhantomData<fn() -> (P, R)>,
}

impl<P, R, F> BoundProcedure<P, R, F> {
    pub fn declared_errors(&self) -> &[DeclaredError] {
        &self.errors
    }

    fn declares(&self, error: &dyn ErrorRecord) -> bool {
        let type_id = Any::type_id(error.as_any());
        self.errors.iter().any(|e| e.type_id == type_id)
    }
}

/// Encodes a value completely before anything goes to the caller, so a value
/// that fails to serialize never leaves a partial reply behind.
fn encode<T: Serialize + ?Sized>(value: &T) -> WireResult<Vec<u8>> {
    let mut scratch = BufferStream::new();
    value.serialize(&mut scratch)?;
    scratch.flush()?;
    Ok(scratch.pending().to_vec())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

impl<P, R, F> Procedure for BoundProcedure<P, R, F>
where
    P: Value,
    R: Value,
    F: Fn(&P, &mut R, &mut CallContext<'_>) -> ProcedureResult + Send + Sync + 'static,
{
    fn number(&self) -> u16 {
        self.number
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn process(
        &self,
        transaction: &Transaction,
        stream: &mut dyn WireStream,
    ) -> WireResult<Option<Box<dyn ConnectionClient>>> {
        let id = transaction.id;
        let mut arguments = P::default();
        match arguments.deserialize(stream).and_then(|()| stream.is_at_end()) {
            Ok(true) => {}
            Err(e) if stream.is_closed() => return Err(e),
            outcome => {
                match outcome {
                    Ok(_) => warn!("{}: trailing data after arguments", self.name),
                    Err(e) => warn!("{}: cannot decode arguments: {}", self.name, e),
                }
                stream.drop_to_end_of_message(SST_RPC)?;
                message::write_reject(stream, id, RejectCode::InvalidArguments, None)?;
                return Ok(None);
            }
        }

        let mut results = R::default();
        let mut context = CallContext::new(transaction, stream);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            (self.implementation)(&arguments, &mut results, &mut context)
        }));
        let hand_off = context.take_hand_off();

        match outcome {
            Ok(Ok(())) => match encode(&results) {
                Ok(bytes) => {
                    message::write_return_header(stream, id)?;
                    stream.write_bytes(&bytes)?;
                    stream.write_end_of_message()?;
                    Ok(hand_off)
                }
                Err(e) => {
                    error!("{}: cannot encode results: {}", self.name, e);
                    message::write_reject(stream, id, RejectCode::InvalidArguments, None)?;
                    Ok(None)
                }
            },
            Ok(Err(ProcedureError::Abort(raised))) if self.declares(raised.as_ref()) => {
                let code = raised.error_code();
                debug!("{}: aborting with error {}", self.name, code);
                match encode(raised.as_ref()) {
                    Ok(bytes) => {
                        message::write_abort_header(stream, id, code)?;
                        stream.write_bytes(&bytes)?;
                        stream.write_end_of_message()?;
                    }
                    Err(e) => {
                        error!("{}: cannot encode error {}: {}", self.name, code, e);
                        message::write_reject(stream, id, RejectCode::InvalidArguments, None)?;
                    }
                }
                Ok(None)
            }
            Ok(Err(ProcedureError::Abort(raised))) => {
                error!("{}: raised undeclared error {:?}", self.name, raised);
                message::write_reject(stream, id, RejectCode::InvalidArguments, None)?;
                Ok(None)
            }
            Ok(Err(ProcedureError::Failed(e))) => {
                error!("{}: failed: {:?}", self.name, e);
                message::write_reject(stream, id, RejectCode::InvalidArguments, None)?;
                Ok(None)
            }
            Err(payload) => {
                error!("{}: panicked: {}", self.name, panic_message(payload.as_ref()));
                message::write_reject(stream, id, RejectCode::InvalidArguments, None)?;
                Ok(None)
            }
        }
    }
}
