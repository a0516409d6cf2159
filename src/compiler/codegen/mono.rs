//! The monomorphization queue.
//!
//! Every generic call queues one instantiation per distinct type-argument
//! tuple. The generator drains the queue after lowering the module's
//! non-generic functions; draining may queue further instantiations, so the
//! loop runs to a fixed point. Already-emitted instantiations are remembered
//! by mangled symbol so nothing is emitted twice.

use crate::compiler::types::TypeRef;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct PendingInstantiation {
    /// Unqualified or `Type::method` qualified function name
    pub function_name: String,
    pub type_args: Vec<TypeRef>,
    pub mangled: String,
}

#[derive(Debug, Default)]
pub struct MonoQueue {
    pending: VecDeque<PendingInstantiation>,
    queued_or_emitted: FxHashSet<String>,
}

impl MonoQueue {
    pub fn new() -> MonoQueue {
        MonoQueue::default()
    }

    /// Queue an instantiation unless that mangled symbol is already queued
    /// or emitted. Returns true when newly queued.
    pub fn request(
        &mut self,
        function_name: &str,
        type_args: Vec<TypeRef>,
        mangled: String,
    ) -> bool {
        if !self.queued_or_emitted.insert(mangled.clone()) {
            return false;
        }
        self.pending.push_back(PendingInstantiation {
            function_name: function_name.to_string(),
            type_args,
            mangled,
        });
        true
    }

    /// Mark a non-queued symbol (a plain function) as emitted so later
    /// requests for it dedup correctly.
    pub fn mark_emitted(&mut self, mangled: &str) {
        self.queued_or_emitted.insert(mangled.to_string());
    }

    pub fn is_known(&self, mangled: &str) -> bool {
        self.queued_or_emitted.contains(mangled)
    }

    pub fn next(&mut self) -> Option<PendingInstantiation> {
        self.pending.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::{Primitive, Type};

    #[test]
    fn duplicate_requests_queue_once() {
        let mut queue = MonoQueue::new();
        let args = vec![Type::primitive(Primitive::I32)];
        assert!(queue.request("id", args.clone(), "tml_id__I32".to_string()));
        assert!(!queue.request("id", args, "tml_id__I32".to_string()));
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn distinct_tuples_queue_separately() {
        let mut queue = MonoQueue::new();
        queue.request(
            "id",
            vec![Type::primitive(Primitive::I32)],
            "tml_id__I32".to_string(),
        );
        queue.request(
            "id",
            vec![Type::primitive(Primitive::I64)],
            "tml_id__I64".to_string(),
        );
        assert_eq!(queue.pending_count(), 2);
    }

    #[test]
    fn drain_order_is_fifo() {
        let mut queue = MonoQueue::new();
        queue.request("a", vec![], "tml_a__X".to_string());
        queue.request("b", vec![], "tml_b__Y".to_string());
        assert_eq!(queue.next().unwrap().function_name, "a");
        assert_eq!(queue.next().unwrap().function_name, "b");
        assert!(queue.is_empty());
    }

    #[test]
    fn emitted_marks_prevent_requeue() {
        let mut queue = MonoQueue::new();
        queue.mark_emitted("tml_main");
        assert!(!queue.request("main", vec![], "tml_main".to_string()));
        assert!(queue.is_known("tml_main"));
    }
}
