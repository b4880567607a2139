//! Address → operation routing.
//!
//! The table maps a full address path (service prefix included) to an [`Op`]
//! and the type tag that op expects. A message is only handed to its op when
//! its tag matches exactly, so handlers can read their arguments without
//! re-checking the layout.

use hashbrown::HashMap;

use crate::error::Rejection;

/// Every operation the engine knows how to execute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    /// `s i`: echo `i` back to the address `s`.
    Ping,
    /// `h B`: start a template (`false`) or a live instrument (`true`).
    Define,
    /// No arguments: leave the building state.
    End,
    /// `h`: instantiate template `instrument` into slot `ugen`.
    NewInstance,
    /// `h`: destroy whatever is in slot `instrument`.
    Delete,
    /// `i i`: bind output `index` to a signal of the current instrument.
    Output,
    /// `h h`: connect a signal to an Input port.
    Plug,
    /// `h h`: remove a connection made by `Plug`.
    Unplug,
    /// No arguments: add an Input port to the current instrument.
    Input,
    /// No arguments: add a block-rate Input port.
    BlockInput,
    /// `i i`: product of two signals, block rate when both operands are.
    Mul,
    /// `i i`: sum of two signals, block rate when both operands are.
    Add,
    /// `f`: constant signal.
    Constant,
    /// `f`: block-rate constant.
    BlockConstant,
    /// `f f`: sine oscillator at a fixed frequency and amplitude.
    Sine,
    /// `i f`: sine oscillator whose frequency is signal `i`.
    SineMod,
}

impl Op {
    pub const ALL: [Op; 16] = [
        Op::Ping,
        Op::Define,
        Op::End,
        Op::NewInstance,
        Op::Delete,
        Op::Output,
        Op::Plug,
        Op::Unplug,
        Op::Input,
        Op::BlockInput,
        Op::Mul,
        Op::Add,
        Op::Constant,
        Op::BlockConstant,
        Op::Sine,
        Op::SineMod,
    ];

    /// Default path below the service prefix.
    pub const fn path(self) -> &'static str {
        match self {
            Op::Ping => "/ping",
            Op::Define => "/ins/def",
            Op::End => "/ins/end",
            Op::NewInstance => "/ins/new",
            Op::Delete => "/ins/del",
            Op::Output => "/ins/out",
            Op::Plug => "/ins/plug",
            Op::Unplug => "/ins/unplug",
            Op::Input => "/input/new",
            Op::BlockInput => "/input/newb",
            Op::Mul => "/mul/new",
            Op::Add => "/add/new",
            Op::Constant => "/const/new",
            Op::BlockConstant => "/const/newb",
            Op::Sine => "/sine/new",
            Op::SineMod => "/sine/mod",
        }
    }

    /// Type tag the op reads, without the leading `,`.
    pub const fn types(self) -> &'static str {
        match self {
            Op::Ping => "si",
            Op::Define => "hB",
            Op::End | Op::Input | Op::BlockInput => "",
            Op::NewInstance | Op::Delete => "h",
            Op::Plug | Op::Unplug => "hh",
            Op::Output | Op::Mul | Op::Add => "ii",
            Op::Constant | Op::BlockConstant => "f",
            Op::Sine => "ff",
            Op::SineMod => "if",
        }
    }

    /// Ops that build instrument contents. While a template is being
    /// defined these are recorded instead of executed.
    pub const fn is_recordable(self) -> bool {
        !matches!(
            self,
            Op::Ping | Op::Define | Op::End | Op::NewInstance | Op::Delete
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    pub op: Op,
    pub types: &'static str,
}

#[derive(Clone, Debug, Default)]
pub struct DispatchTable {
    routes: HashMap<String, Route>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with every [`Op`] registered at its default path under
    /// `service` (for example `/syn`).
    pub fn with_service(service: &str) -> Self {
        let mut table = Self::new();
        for op in Op::ALL {
            table.register(&format!("{service}{}", op.path()), op.types(), op);
        }
        table
    }

    /// Register (or replace) the route at `path`. Handlers read their
    /// arguments as `op.types()`, so any other tag makes every message on
    /// this route fail to decode.
    pub fn register(&mut self, path: &str, types: &'static str, op: Op) -> Option<Route> {
        self.routes.insert(path.to_owned(), Route { op, types })
    }

    pub fn unregister(&mut self, path: &str) -> Option<Route> {
        self.routes.remove(path)
    }

    pub fn route(&self, path: &str) -> Option<&Route> {
        self.routes.get(path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the op for `address`, accepting it only if `types` matches the
    /// registered tag exactly.
    pub fn resolve(&self, address: &str, types: &str) -> Result<Op, Rejection> {
        let route = self.routes.get(address).ok_or(Rejection::UnknownAddress)?;
        if route.types != types {
            return Err(Rejection::TypeMismatch { expected: route.types });
        }
        Ok(route.op)
    }
}
