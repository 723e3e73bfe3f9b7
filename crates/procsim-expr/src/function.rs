//! Built-in names: pure functions, scope values and state queries.

use procsim_core::expr::{CalcError, EvalScope};

// ---------------------------------------------------------------------------
// Pure functions
// ---------------------------------------------------------------------------

/// A function of its arguments only. Calls to these fold when every
/// argument is constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Sqrt,
    Exp,
    Ln,
    Log,
    Floor,
    Ceil,
    Round,
    Sign,
    Sin,
    Cos,
    Tan,
    Pow,
    Min,
    Max,
}

impl Function {
    pub fn lookup(name: &str) -> Option<Self> {
        let f = match name.to_ascii_lowercase().as_str() {
            "abs" => Self::Abs,
            "sqrt" => Self::Sqrt,
            "exp" => Self::Exp,
            "ln" => Self::Ln,
            "log" => Self::Log,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            "round" => Self::Round,
            "sign" => Self::Sign,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "pow" => Self::Pow,
            "min" => Self::Min,
            "max" => Self::Max,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Abs => "abs",
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::Ln => "ln",
            Self::Log => "log",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Round => "round",
            Self::Sign => "sign",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Pow => "pow",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    /// Accepted argument counts, inclusive.
    pub fn arity(self) -> (usize, usize) {
        match self {
            Self::Pow => (2, 2),
            Self::Min | Self::Max => (1, usize::MAX),
            _ => (1, 1),
        }
    }

    pub fn apply(self, args: &[f64]) -> Result<f64, CalcError> {
        let x = args.first().copied().unwrap_or(0.0);
        let domain = || CalcError::Domain(self.name().into());
        match self {
            Self::Abs => Ok(x.abs()),
            Self::Sqrt if x < 0.0 => Err(domain()),
            Self::Sqrt => Ok(x.sqrt()),
            Self::Exp => Ok(x.exp()),
            Self::Ln | Self::Log if x <= 0.0 => Err(domain()),
            Self::Ln => Ok(x.ln()),
            Self::Log => Ok(x.log10()),
            Self::Floor => Ok(x.floor()),
            Self::Ceil => Ok(x.ceil()),
            Self::Round => Ok(x.round()),
            Self::Sign => Ok(if x == 0.0 { 0.0 } else { x.signum() }),
            Self::Sin => Ok(x.sin()),
            Self::Cos => Ok(x.cos()),
            Self::Tan => Ok(x.tan()),
            Self::Pow => {
                let y = args.get(1).copied().unwrap_or(0.0);
                let v = x.powf(y);
                if v.is_nan() { Err(domain()) } else { Ok(v) }
            }
            Self::Min => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
            Self::Max => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        }
    }
}

// ---------------------------------------------------------------------------
// Scope values
// ---------------------------------------------------------------------------

/// A bare name that reads the evaluation scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeValue {
    /// Current simulated time in seconds.
    Time,
    /// Clients currently in the system.
    Wip,
    ClientNumber,
    /// One-based index of the client's type.
    ClientType,
    WaitingTime,
    TransferTime,
    ProcessTime,
    ResidenceTime,
}

impl ScopeValue {
    pub fn lookup(name: &str) -> Option<Self> {
        let v = match name.to_ascii_lowercase().as_str() {
            "time" | "t" => Self::Time,
            "wip" => Self::Wip,
            "clientnumber" => Self::ClientNumber,
            "clienttype" => Self::ClientType,
            "waitingtime" | "w" => Self::WaitingTime,
            "transfertime" => Self::TransferTime,
            "processtime" => Self::ProcessTime,
            "residencetime" => Self::ResidenceTime,
            _ => return None,
        };
        Some(v)
    }

    pub fn read(self, scope: &EvalScope<'_>) -> Result<f64, CalcError> {
        match self {
            Self::Time => return Ok(scope.now),
            Self::Wip => return Ok(scope.query.clients_in_system()),
            _ => {}
        }
        let client = scope.client.as_ref().ok_or(CalcError::NoClient)?;
        Ok(match self {
            Self::ClientNumber => client.number as f64,
            Self::ClientType => f64::from(client.type_id) + 1.0,
            Self::WaitingTime => client.waiting,
            Self::TransferTime => client.transfer,
            Self::ProcessTime => client.process,
            Self::ResidenceTime => client.residence,
            Self::Time | Self::Wip => 0.0,
        })
    }
}

/// Named numeric constants.
pub fn constant(name: &str) -> Option<f64> {
    match name.to_ascii_lowercase().as_str() {
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        "true" => Some(1.0),
        "false" => Some(0.0),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// State queries
// ---------------------------------------------------------------------------

/// A one-argument function reading live replication or client state.
/// Station arguments are model ids; every other index is one-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Clients at a station.
    AtStation,
    /// Clients waiting in a station's queue.
    InQueue,
    ResourceInUse,
    TankLevel,
    AnalogValue,
    Counter,
    /// A number slot of the current client.
    ClientData,
}

impl Query {
    pub fn lookup(name: &str) -> Option<Self> {
        let q = match name.to_ascii_lowercase().as_str() {
            "n" => Self::AtStation,
            "nq" => Self::InQueue,
            "resource" => Self::ResourceInUse,
            "tank" => Self::TankLevel,
            "analog" => Self::AnalogValue,
            "counter" => Self::Counter,
            "clientdata" => Self::ClientData,
            _ => return None,
        };
        Some(q)
    }

    fn what(self) -> &'static str {
        match self {
            Self::AtStation | Self::InQueue => "station",
            Self::ResourceInUse => "resource",
            Self::TankLevel => "tank",
            Self::AnalogValue => "analog value",
            Self::Counter => "counter",
            Self::ClientData => "client data slot",
        }
    }

    pub fn read(self, scope: &EvalScope<'_>, arg: f64) -> Result<f64, CalcError> {
        let id = arg.round() as i64;
        let unknown = || CalcError::UnknownReference { what: self.what(), id };
        let q = scope.query;
        match self {
            Self::AtStation => q.clients_at_station(id).ok_or_else(unknown),
            Self::InQueue => q.clients_in_queue(id).ok_or_else(unknown),
            Self::ResourceInUse => q.resource_in_use(id).ok_or_else(unknown),
            Self::TankLevel => q.tank_level(id).ok_or_else(unknown),
            Self::AnalogValue => q.analog_value(id).ok_or_else(unknown),
            Self::Counter => q.counter(id).ok_or_else(unknown),
            Self::ClientData => {
                let client = scope.client.as_ref().ok_or(CalcError::NoClient)?;
                if id < 1 {
                    return Err(unknown());
                }
                Ok(client.number_slot((id - 1) as usize))
            }
        }
    }
}
