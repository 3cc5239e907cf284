//! Notify fan-out (C6): the three event classes spec §4.1 distinguishes.

use std::sync::Arc;

use crate::xlator::Translator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    ParentUp,
    ParentDown,
    ChildUp,
    ChildDown,
    ChildConnecting,
    AuthFailed,
    Upcall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventClass {
    ParentBound,
    ChildBound,
    Generic,
}

impl Event {
    fn class(self) -> EventClass {
        match self {
            Event::ParentUp | Event::ParentDown => EventClass::ParentBound,
            Event::ChildUp | Event::ChildDown | Event::ChildConnecting | Event::AuthFailed => EventClass::ChildBound,
            Event::Upcall => EventClass::Generic,
        }
    }
}

/// Fan an event out from `origin` per spec §4.1:
/// - parent-bound events (`PARENT_UP`/`PARENT_DOWN`) propagate to every
///   descendant;
/// - child-bound events (`CHILD_UP`/`CHILD_DOWN`/`CHILD_CONNECTING`/
///   `AUTH_FAILED`) propagate to every ancestor, or to `master` when a node
///   has no parent;
/// - generic events (`UPCALL`) propagate like child-bound events, but only
///   once `init_succeeded` is true for the receiving node.
pub fn notify(origin: &Arc<Translator>, event: Event, master: Option<&Arc<Translator>>, init_succeeded: bool) {
    match event.class() {
        EventClass::ParentBound => fan_down(origin, event),
        EventClass::ChildBound => fan_up(origin, event, master, true),
        EventClass::Generic => fan_up(origin, event, master, init_succeeded),
    }
}

fn fan_down(node: &Arc<Translator>, event: Event) {
    for child in &node.children {
        child.imp().notify(event);
        fan_down(child, event);
    }
}

fn fan_up(node: &Arc<Translator>, event: Event, master: Option<&Arc<Translator>>, gate: bool) {
    if !gate {
        return;
    }
    let parents = node.parents();
    if parents.is_empty() {
        if let Some(master) = master {
            master.imp().notify(event);
        }
        return;
    }
    for parent in &parents {
        parent.imp().notify(event);
        fan_up(parent, event, master, gate);
    }
}
