use proc_macro::TokenStream;
use syn_utils::into_macro_output;

#[macro_use]
mod syn_utils;

mod state_impl;

/// Implements `StateFields` for a struct with named fields.
///
/// For a struct `Name`, this also generates:
///
/// - `NamePatch`: one `Option<T>` field per state field, used by `Store::merge`.
/// - `NameFields`: a trait implemented for `Tracked<'_, Name>` with one accessor per field.
///   Each accessor records a read of its field.
///
/// # Attributes
///
/// | Attribute                  | Position | Effect                                                       |
/// |----------------------------|----------|--------------------------------------------------------------|
/// | `#[state(serde)]`          | struct   | derives `Serialize` and `Deserialize` for `NamePatch`        |
/// | `#[state(eq = path)]`      | field    | compares the field with `path(&a, &b)` instead of `==`       |
///
/// # Examples
///
/// ```ignore
/// #[derive(Clone, State)]
/// #[state(serde)]
/// struct Todos {
///     items: Vec<String>,
///     #[state(eq = Rc::ptr_eq)]
///     filter: Rc<Filter>,
/// }
/// ```
#[proc_macro_derive(State, attributes(state))]
pub fn derive_state(input: TokenStream) -> TokenStream {
    into_macro_output(state_impl::derive_state(input.into()))
}
