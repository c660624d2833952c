use std::time::{SystemTime, UNIX_EPOCH};

use num_derive::{FromPrimitive, ToPrimitive};
use xns_courier::courier::{CourierEnum, CourierError, CourierRecord, CourierString};
use xns_courier::rpc::{ProcedureError, Program};

pub const PROGRAM: u32 = 15;
pub const VERSION: u16 = 2;

/// Seconds between 1901-01-01 (the XNS epoch) and 1970-01-01.
const XNS_EPOCH_OFFSET: u32 = 2_177_452_800;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum OffsetDirection {
    #[default]
    West = 0,
    East = 1,
}
CourierEnum!(OffsetDirection, West, East);

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u16)]
pub enum ToleranceType {
    #[default]
    Unknown = 0,
    InMilliSeconds = 1,
}
CourierEnum!(ToleranceType, Unknown, InMilliSeconds);

#[derive(Clone, Debug, Default)]
pub struct TimeInfo {
    pub time: u32,
    pub offset_direction: OffsetDirection,
    pub offset_hours: u16,
    pub offset_minutes: u16,
    pub dst_start: u16,
    pub dst_end: u16,
    pub tolerance_type: ToleranceType,
    pub tolerance: u32,
}
CourierRecord!(
    TimeInfo,
    time,
    offset_direction,
    offset_hours,
    offset_minutes,
    dst_start,
    dst_end,
    tolerance_type,
    tolerance
);

#[derive(Clone, Debug, Default)]
pub struct EchoRecord {
    pub text: CourierString<100>,
}
CourierRecord!(EchoRecord, text);

/// Raised by `Echo` when there is nothing to echo.
#[derive(Clone, Debug, Default)]
pub struct NothingToEcho {}
CourierRecord!(NothingToEcho,);
CourierError!(NothingToEcho, 1);

fn now() -> u32 {
    let unix = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    (unix as u32).wrapping_add(XNS_EPOCH_OFFSET)
}

pub fn program() -> Program {
    let mut program = Program::new("Time", PROGRAM, VERSION);
    program.procedure::<(), TimeInfo>(0, "GetTime").bind(|_, result, _| {
        result.time = now();
        result.tolerance_type = ToleranceType::InMilliSeconds;
        result.tolerance = 100;
        Ok(())
    });
    program
        .procedure::<EchoRecord, EchoRecord>(1, "Echo")
        .error::<NothingToEcho>()
        .bind(|arguments, result, context| {
            if arguments.text.is_empty() {
                return Err(ProcedureError::abort(NothingToEcho {}));
            }
            tracing::info!("{} says {}", context.connection_id(), arguments.text);
            result.text = arguments.text.clone();
            Ok(())
        });
    program
}
