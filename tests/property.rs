// property-based checks for invariants that are easy to state and easy
// to get subtly wrong: constant-pool deduplication and compiled-program
// stack balance. `proptest` shrinks failures to a minimal reproducing
// case, which matters more here than exhaustive coverage would.

use proptest::prelude::*;

use tiny::constants::ConstantPool;

proptest! {
    #[test]
    fn registering_a_number_twice_always_returns_the_same_index(value in any::<f64>().prop_filter("no NaNs, bit-pattern equality would be surprising", |v| !v.is_nan())) {
        let mut pool = ConstantPool::new();
        let a = pool.register_number(value).unwrap();
        let b = pool.register_number(value).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn registering_distinct_strings_never_collides(a in "[a-z]{0,16}", b in "[a-z]{0,16}") {
        prop_assume!(a != b);
        let mut pool = ConstantPool::new();
        let ia = pool.register_string(a.as_bytes()).unwrap();
        let ib = pool.register_string(b.as_bytes()).unwrap();
        prop_assert_ne!(ia, ib);
    }

    #[test]
    fn any_sequence_of_write_statements_compiles_and_runs_to_completion(values in prop::collection::vec(any::<i16>(), 0..20)) {
        use std::io::Write;
        let src = {
            let mut s = String::from("begin ");
            for v in &values {
                s.push_str(&format!("write {v} end "));
            }
            s.push_str("end");
            s
        };
        let mut interp = tiny::Interpreter::with_io(
            Box::new(tiny::MemoryIo::new("")),
            Box::new(std::io::sink()),
        );
        interp.compile(src.as_bytes()).unwrap();
        prop_assert!(interp.run().is_ok());
        let _ = std::io::stdout().flush();
    }
}
