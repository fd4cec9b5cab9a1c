use lumen::object::{decrement, increment};
use lumen::{AliveRegistry, Object, ObjectHeader, Ref};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Counted {
    header: ObjectHeader,
    drops: Arc<AtomicUsize>,
}

impl Object for Counted {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// `true` = increment, `false` = decrement
fn balanced_ops() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 0..200)
}

proptest! {
    #[test]
    fn destroyed_once_when_count_first_hits_zero(ops in balanced_ops()) {
        let drops = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(AliveRegistry::new());
        let ptr = Ref::into_raw(Ref::new_in(
            Counted { header: ObjectHeader::new(), drops: Arc::clone(&drops) },
            &registry,
        ));

        let mut count = 1u32;
        for op in ops {
            if op {
                unsafe { increment(ptr) };
                count += 1;
            } else if count > 1 {
                unsafe { decrement(ptr) };
                count -= 1;
            }
            prop_assert_eq!(drops.load(Ordering::SeqCst), 0);
            prop_assert_eq!(unsafe { ptr.as_ref() }.header().count(), count);
        }

        // Release the remainder; only the very last release destroys
        while count > 1 {
            unsafe { decrement(ptr) };
            count -= 1;
            prop_assert_eq!(drops.load(Ordering::SeqCst), 0);
        }
        unsafe { decrement(ptr) };

        prop_assert_eq!(drops.load(Ordering::SeqCst), 1);
        prop_assert!(registry.is_empty());
    }

    #[test]
    fn live_report_matches_created_minus_destroyed(created in 1usize..40, destroyed_ratio in 0.0f64..=1.0) {
        let registry = Arc::new(AliveRegistry::new());
        let drops = Arc::new(AtomicUsize::new(0));
        let destroyed = ((created as f64) * destroyed_ratio) as usize;

        let mut objects: Vec<_> = (0..created)
            .map(|_| Ref::new_in(Counted { header: ObjectHeader::new(), drops: Arc::clone(&drops) }, &registry))
            .collect();
        objects.truncate(created - destroyed);

        prop_assert_eq!(drops.load(Ordering::SeqCst), destroyed);
        if lumen::registry::ENABLED {
            let live: usize = registry.report().iter().map(|entry| entry.count).sum();
            prop_assert_eq!(live, created - destroyed);
        }
    }
}
