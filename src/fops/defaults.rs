//! The empty translator: every FOP unset, used as a graph leaf in tests and
//! as the base a real translator's `impl Xlator` only partially overrides.

use super::Xlator;

pub struct DefaultXlator;

impl Xlator for DefaultXlator {}
