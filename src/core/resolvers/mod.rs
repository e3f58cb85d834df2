// src/core/resolvers/mod.rs

//! The command sources plugged into the resolver chain.

pub mod alias;
pub mod builtin;
pub mod custom;
pub mod external;
pub mod hook;
pub mod intermediate;

use crate::core::resolver::CommandResolver;
use std::rc::Rc;

/// The chain used below a parent that does not bring its own. The root gets the core
/// resolver, every other group its static children.
pub fn default_chain(root: bool) -> Vec<Rc<dyn CommandResolver>> {
    let structural: Rc<dyn CommandResolver> = if root {
        Rc::new(builtin::CoreResolver)
    } else {
        Rc::new(builtin::GroupResolver)
    };
    vec![
        Rc::new(alias::AliasResolver),
        Rc::new(external::ExternalResolver),
        Rc::new(custom::CustomResolver),
        Rc::new(hook::HookResolver),
        structural,
        Rc::new(alias::AliasToGroupResolver),
        Rc::new(intermediate::IntermediateResolver),
    ]
}

/// The chain used for `_name` lookups.
pub fn core_only_chain(root: bool) -> Vec<Rc<dyn CommandResolver>> {
    if root {
        vec![Rc::new(builtin::CoreResolver)]
    } else {
        vec![Rc::new(builtin::GroupResolver)]
    }
}
