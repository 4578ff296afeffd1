#![forbid(unsafe_code)]
#![deny(clippy::all)]

pub mod chan;
pub mod cmp;
pub mod codec;
pub mod flare;
pub mod lock;
pub mod trace;
pub mod vecset;

/// Shadows the named bindings with clones, for moving into tasks and closures.
#[macro_export]
macro_rules! clone {
    ($($name:ident),+ $(,)?) => {
        $(let $name = ::core::clone::Clone::clone(&$name);)+
    };
}
