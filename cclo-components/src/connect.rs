// Copyright (c) 2026 Graphcore Ltd. All rights reserved.

//! Helper connection macros

pub use paste::paste;

#[macro_export]
/// Connect an [OutPort](cclo_engine::port::OutPort) port to an
/// [InPort](cclo_engine::port::InPort)
macro_rules! connect_port {
    ($from:expr, $from_port_name:ident => $to:expr, $to_port_name:ident) => {
        cclo_track::debug!($from.entity() ; "Connect {}.{} => {}.{}", $from, stringify!($from_port_name), $to, stringify!($to_port_name));
        $crate::connect::paste! {
            $from.[< connect_port_ $from_port_name >]($to.[< port_ $to_port_name >]());
        }
    };
    ($from:expr, $from_port_name:ident, $from_index:expr => $to:expr, $to_port_name:ident) => {
        let from_index: usize = $from_index;
        cclo_track::debug!($from.entity() ; "Connect {}.{}[{}] => {}.{}", $from, stringify!($from_port_name), from_index, $to, stringify!($to_port_name));
        $crate::connect::paste! {
            $from.[< connect_port_ $from_port_name _i >](from_index, $to.[< port_ $to_port_name >]());
        }
    };
    ($from:expr, $from_port_name:ident => $to:expr, $to_port_name:ident, $to_index:expr) => {
        let to_index: usize = $to_index;
        cclo_track::debug!($from.entity() ; "Connect {}.{} => {}.{}[{}]", $from, stringify!($from_port_name), $to, stringify!($to_port_name), to_index);
        $crate::connect::paste! {
            $from.[< connect_port_ $from_port_name >]($to.[< port_ $to_port_name _i >](to_index));
        }
    };
    ($from:expr, $from_port_name:ident, $from_index:expr => $to:expr, $to_port_name:ident, $to_index:expr) => {
        let from_index: usize = $from_index;
        let to_index: usize = $to_index;
        cclo_track::debug!($from.entity() ; "Connect {}.{}[{}] => {}.{}[{}]", $from, stringify!($from_port_name), from_index, $to, stringify!($to_port_name), to_index);
        $crate::connect::paste! {
            $from.[< connect_port_ $from_port_name _i >](from_index, $to.[< port_ $to_port_name _i >](to_index));
        }
    };
}

#[macro_export]
/// Connect a tx port held in a `Mutex<Option<OutPort>>`.
///
/// Connecting once the component is running has no effect.
macro_rules! connect_tx {
    ($port:expr, $fn:ident ; $port_state:expr) => {
        if let Some(port) = cclo_track::lock(&$port).as_mut() {
            port.$fn($port_state);
        }
    };
}

#[macro_export]
/// Take a tx port out of a `Mutex<Option<OutPort>>` when a component starts
/// running.
///
/// Evaluates to a `Result` which fails if the port has already been taken.
macro_rules! take_option {
    ($var:expr) => {
        cclo_track::lock(&$var).take().ok_or_else(|| {
            cclo_engine::types::SimError(format!("{} already taken", stringify!($var)))
        })
    };
}
