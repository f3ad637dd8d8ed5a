use proc_macro::TokenStream;
use quote::quote;
use syn::{DeriveInput, LitStr};

pub fn derive_payload(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let type_id = match extract_type_id(&input) {
        Ok(Some(type_id)) => type_id,
        Ok(None) => name.to_string(),
        Err(err) => return err.to_compile_error().into(),
    };

    if type_id.trim().is_empty() {
        return syn::Error::new_spanned(name, "Payload derive: `type_id` must not be empty")
            .to_compile_error()
            .into();
    }

    let expanded = quote! {
        impl #impl_generics ::sourced_servicebus::Payload for #name #ty_generics #where_clause {
            const TYPE_ID: &'static str = #type_id;
        }
    };

    TokenStream::from(expanded)
}

/// Reads `#[payload(type_id = "...")]` from the struct-level attributes.
fn extract_type_id(input: &DeriveInput) -> syn::Result<Option<String>> {
    let mut type_id = None;

    for attr in &input.attrs {
        if !attr.path().is_ident("payload") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("type_id") {
                let value: LitStr = meta.value()?.parse()?;
                type_id = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unsupported payload attribute, expected `type_id`"))
            }
        })?;
    }

    Ok(type_id)
}
