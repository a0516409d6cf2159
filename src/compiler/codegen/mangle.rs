//! Symbol mangling.
//!
//! Every TML function lowers to a symbol of the form
//! `tml_[suite_prefix]<name>` with `__<arg1>_<arg2>` appended for
//! monomorphized generics. Method symbols qualify the receiver type into the
//! name (`Type::method` -> `Type_method`). Pointer-typed arguments mangle as
//! `ptr_<inner>`, mutable pointers as `mutptr_<inner>`.

use crate::compiler::codegen::types::flatten_type_name;
use crate::compiler::types::TypeRef;
use crate::settings;

pub fn mangle_function(name: &str, type_args: &[TypeRef], suite_prefix: Option<&str>) -> String {
    let base = name.replace("::", "_");
    let prefix = suite_prefix.unwrap_or("");
    if type_args.is_empty() {
        format!("{}{prefix}{base}", settings::MANGLE_PREFIX)
    } else {
        let args = type_args
            .iter()
            .map(flatten_type_name)
            .collect::<Vec<_>>()
            .join("_");
        format!("{}{prefix}{base}__{args}", settings::MANGLE_PREFIX)
    }
}

/// Suite test entry points are positional: `tml_test_<index>`.
pub fn mangle_test(index: usize) -> String {
    format!("{}test_{index}", settings::MANGLE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::{Primitive, Type};

    #[test]
    fn plain_functions_keep_their_name() {
        assert_eq!(mangle_function("main", &[], None), "tml_main");
        assert_eq!(
            mangle_function("Point::magnitude", &[], None),
            "tml_Point_magnitude"
        );
    }

    #[test]
    fn generic_instantiations_append_their_args() {
        assert_eq!(
            mangle_function("id", &[Type::primitive(Primitive::I32)], None),
            "tml_id__I32"
        );
        assert_eq!(
            mangle_function(
                "id",
                &[Type::primitive(Primitive::I64), Type::primitive(Primitive::Str)],
                None
            ),
            "tml_id__I64_Str"
        );
    }

    #[test]
    fn pointer_args_use_ptr_prefixes() {
        let shared = std::sync::Arc::new(crate::compiler::types::Type::Pointer {
            target: Type::primitive(Primitive::U8),
            mutable: false,
        });
        let mutable = std::sync::Arc::new(crate::compiler::types::Type::Pointer {
            target: Type::primitive(Primitive::U8),
            mutable: true,
        });
        assert_eq!(mangle_function("write", &[shared], None), "tml_write__ptr_U8");
        assert_eq!(
            mangle_function("write", &[mutable], None),
            "tml_write__mutptr_U8"
        );
    }

    #[test]
    fn suite_prefix_lands_between_tml_and_the_name() {
        assert_eq!(
            mangle_function("helper", &[], Some("s0_")),
            "tml_s0_helper"
        );
    }

    #[test]
    fn test_symbols_are_positional() {
        assert_eq!(mangle_test(0), "tml_test_0");
        assert_eq!(mangle_test(41), "tml_test_41");
    }
}
