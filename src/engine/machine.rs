use strum::{Display, EnumIter};
use strum_macros::EnumString;

use crate::{
    domain::{
        keys::Direction,
        position::PositionStatus,
        snapshot::Snapshot,
        trade::TradeType,
        units::Qty,
    },
    error::TransitionError,
};

/// Lifecycle state of a position key as seen by the state machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineState {
    NonExistent,
    ActiveLong,
    ActiveShort,
    Terminated,
}

impl MachineState {
    pub fn from_snapshot(snapshot: Option<&Snapshot>) -> Self {
        match snapshot {
            None => MachineState::NonExistent,
            Some(s) if s.status == PositionStatus::Terminated => MachineState::Terminated,
            Some(s) => match s.direction {
                Direction::Long => MachineState::ActiveLong,
                Direction::Short => MachineState::ActiveShort,
            },
        }
    }

    fn direction(&self) -> Option<Direction> {
        match self {
            MachineState::ActiveLong => Some(Direction::Long),
            MachineState::ActiveShort => Some(Direction::Short),
            _ => None,
        }
    }
}

/// What the engine must do for one trade, decided from the pre-computed
/// post-trade quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// First trade on the key: create the position, mint a UPI.
    Open,
    /// Trade grows the position: add a lot.
    AddLot,
    /// Trade shrinks the position but leaves it open: reduce lots.
    Reduce,
    /// Trade consumes the position exactly: reduce fully, terminate, keep
    /// the UPI (terminated in history).
    Close,
    /// NEW_TRADE on a terminated key: new lot, new UPI generation.
    Reopen,
    /// Trade crosses the zero line: split into a closing leg on this key and
    /// an opening leg of `open_qty` on the opposite-direction key.
    DirectionChange { close_qty: Qty, open_qty: Qty },
}

/// Decides the transition for a trade against the current machine state.
///
/// `open_qty` is the unsigned remaining quantity on this key. Whether a
/// trade type grows or shrinks the position depends on the side: INCREASE
/// grows a long and buys back a short, DECREASE shrinks a long and grows a
/// short.
pub fn evaluate(
    state: MachineState,
    trade_type: TradeType,
    quantity: Qty,
    open_qty: Qty,
) -> Result<Transition, TransitionError> {
    let invalid = || TransitionError::InvalidForState {
        state: state.to_string(),
        trade_type: trade_type.to_string(),
    };

    match (state, trade_type) {
        (MachineState::NonExistent, TradeType::NewTrade) => Ok(Transition::Open),
        (MachineState::NonExistent, _) => Err(invalid()),

        (MachineState::Terminated, TradeType::NewTrade) => Ok(Transition::Reopen),
        (MachineState::Terminated, _) => Err(invalid()),

        (MachineState::ActiveLong | MachineState::ActiveShort, TradeType::NewTrade) => {
            Err(invalid())
        }

        (MachineState::ActiveLong | MachineState::ActiveShort, trade_type) => {
            let direction = state.direction().expect("active state has a direction");
            let grows = match (direction, trade_type) {
                (Direction::Long, TradeType::Increase) => true,
                (Direction::Short, TradeType::Decrease) => true,
                (Direction::Long, TradeType::Decrease) => false,
                (Direction::Short, TradeType::Increase) => false,
                (_, TradeType::NewTrade) => unreachable!("handled above"),
            };

            if grows {
                return Ok(Transition::AddLot);
            }

            // Post-trade signed quantity relative to this key's direction.
            if quantity < open_qty {
                Ok(Transition::Reduce)
            } else if quantity == open_qty {
                Ok(Transition::Close)
            } else {
                Ok(Transition::DirectionChange {
                    close_qty: open_qty,
                    open_qty: quantity - open_qty,
                })
            }
        }
    }
}
