use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use syn::{parse2, spanned::Spanned, Attribute, Data, DeriveInput, Expr, Fields, Result};

use crate::syn_utils::{attrs_named, unraw_name};

pub fn derive_state(input: TokenStream) -> Result<TokenStream> {
    let input: DeriveInput = parse2(input)?;
    let args = StateArgs::from_attrs(&input.attrs)?;
    let Data::Struct(data) = &input.data else {
        bail!(input.ident.span(), "`#[derive(State)]` supports only structs");
    };
    let Fields::Named(fields) = &data.fields else {
        bail!(
            data.fields.span(),
            "`#[derive(State)]` supports only structs with named fields"
        );
    };
    if !input.generics.params.is_empty() {
        bail!(
            input.generics.span(),
            "`#[derive(State)]` does not support generic parameters"
        );
    }

    let vis = &input.vis;
    let ident = &input.ident;
    let patch_ident = format_ident!("{}Patch", ident);
    let fields_ident = format_ident!("{}Fields", ident);

    let mut names = Vec::new();
    let mut ne_arms = Vec::new();
    let mut field_arms = Vec::new();
    let mut patch_fields = Vec::new();
    let mut apply_patch = Vec::new();
    let mut accessor_sigs = Vec::new();
    let mut accessors = Vec::new();
    for (index, field) in fields.named.iter().enumerate() {
        let Some(field_ident) = &field.ident else {
            bail!(field.span(), "missing field name");
        };
        let field_args = FieldArgs::from_attrs(&field.attrs)?;
        let name = unraw_name(field_ident);
        let ty = &field.ty;

        let ne = if let Some(eq) = &field_args.eq {
            quote!(!(#eq)(&self.#field_ident, &other.#field_ident))
        } else {
            quote!(self.#field_ident != other.#field_ident)
        };
        ne_arms.push(quote!(#index => #ne,));
        field_arms.push(quote!(
            #index => ::core::option::Option::Some(&self.#field_ident as &dyn ::core::any::Any),
        ));
        patch_fields.push(quote!(pub #field_ident: ::core::option::Option<#ty>,));
        apply_patch.push(quote!(
            if let ::core::option::Option::Some(value) = patch.#field_ident {
                self.#field_ident = value;
            }
        ));
        accessor_sigs.push(quote!(fn #field_ident(&self) -> &#ty;));
        accessors.push(quote!(
            fn #field_ident(&self) -> &#ty {
                self.read(#name, |s| &s.#field_ident)
            }
        ));
        names.push(name);
    }

    let patch_serde = if args.serde {
        quote!(
            #[derive(
                ::sigquery::exports::serde::Serialize,
                ::sigquery::exports::serde::Deserialize
            )]
            #[serde(crate = "::sigquery::exports::serde", default)]
        )
    } else {
        quote!()
    };

    Ok(quote! {
        #[derive(::core::default::Default, ::core::clone::Clone)]
        #patch_serde
        #vis struct #patch_ident {
            #(#patch_fields)*
        }

        #[automatically_derived]
        impl ::sigquery::StateFields for #ident {
            const FIELDS: &'static [&'static str] = &[#(#names),*];
            type Patch = #patch_ident;

            fn field_ne(&self, other: &Self, index: usize) -> bool {
                match index {
                    #(#ne_arms)*
                    _ => false,
                }
            }
            fn field(&self, index: usize) -> ::core::option::Option<&dyn ::core::any::Any> {
                match index {
                    #(#field_arms)*
                    _ => ::core::option::Option::None,
                }
            }
            fn apply_patch(&mut self, patch: Self::Patch) {
                #(#apply_patch)*
            }
        }

        #vis trait #fields_ident {
            #(#accessor_sigs)*
        }

        #[automatically_derived]
        impl #fields_ident for ::sigquery::Tracked<'_, #ident> {
            #(#accessors)*
        }
    })
}

#[derive(Default)]
struct StateArgs {
    serde: bool,
}
impl StateArgs {
    fn from_attrs(attrs: &[Attribute]) -> Result<Self> {
        let mut args = Self::default();
        for attr in attrs_named(attrs, "state") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("serde") {
                    args.serde = true;
                    Ok(())
                } else {
                    Err(meta.error("unknown `state` argument, expected `serde`"))
                }
            })?;
        }
        Ok(args)
    }
}

#[derive(Default)]
struct FieldArgs {
    eq: Option<Expr>,
}
impl FieldArgs {
    fn from_attrs(attrs: &[Attribute]) -> Result<Self> {
        let mut args = Self::default();
        for attr in attrs_named(attrs, "state") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("eq") {
                    args.eq = Some(meta.value()?.parse()?);
                    Ok(())
                } else {
                    Err(meta.error("unknown `state` argument, expected `eq = ...`"))
                }
            })?;
        }
        Ok(args)
    }
}
