// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::HashMap;

use proc_macro2::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::*;

struct ActionArg<'a> {
    name: &'a Ident,
}

struct Action<'a> {
    name: &'a Ident,
    action_name: String,
    action_args: Vec<ActionArg<'a>>,
}

struct FieldInfo<'a> {
    name: &'a Ident,
    field_name: String,
}

// For a single key, return the code that pushes each field into the sink in
// declaration order.
fn get_match_encoders(keys: &[FieldInfo]) -> TokenStream {
    let mut tokens = TokenStream::new();
    for key in keys {
        let field = key.name;
        tokens.extend(quote! {
            sink.push(aal::FieldValue::from(self.#field))?;
        });
    }

    tokens
}

// Build the code that converts a slice of decoded fields back into the
// original struct.  The Nth field of the struct comes from the Nth value:
//
// BunnyKey {
//     robot_id: (&fields[0usize]).try_into().map_err(..)?,
//     joint_id: (&fields[1usize]).try_into().map_err(..)?,
// }
fn get_match_decoder(struct_name: &Ident, fields: &[FieldInfo]) -> TokenStream {
    let mut field_code = TokenStream::new();
    for (idx, field) in fields.iter().enumerate() {
        let name = field.name;
        #[rustfmt::skip]
        field_code.extend(quote! {
	    #name: (&fields[#idx])
		.try_into()
		.map_err(|e| {
			let msg = format!("failed to convert {}: {e:?}",
			  stringify!(#name));
                      aal::AsicError::Decode(msg)
                })?,
        });
    }
    quote! {
        #struct_name {
           #field_code
        }
    }
}

fn get_match_key_values(keys: &[FieldInfo]) -> TokenStream {
    let mut tokens = TokenStream::new();
    for key in keys {
        let field = key.name;
        let label = &key.field_name;
        tokens.extend(quote! {
            fields.insert(#label.to_string(), self.#field.to_string());
        });
    }

    tokens
}

// Build the { a, b, c } pattern used to bind a variant's arguments, or
// nothing at all for a unit variant.
fn get_arg_pattern(action: &Action) -> TokenStream {
    if action.action_args.is_empty() {
        return TokenStream::new();
    }
    let mut t = TokenStream::new();
    for arg in &action.action_args {
        let name = arg.name;
        t.extend(quote! { #name , });
    }
    quote! { { #t } }
}

// Build the { .. } pattern that ignores a variant's arguments
fn get_wildcard_pattern(action: &Action) -> TokenStream {
    match action.action_args.is_empty() {
        true => TokenStream::new(),
        false => quote! { { .. } },
    }
}

// Generate the code that encodes a single action's arguments.
//
// We're building something like:
//     Action::SetTarget { next_id, duration } => {
//         sink.push(aal::FieldValue::from(*next_id))?;
//         sink.push(aal::FieldValue::from(*duration))?;
//     },
fn get_action_encoder(enum_name: &Ident, action: &Action) -> TokenStream {
    let ident = action.name;
    let pattern = get_arg_pattern(action);

    let mut pushes = TokenStream::new();
    for arg in &action.action_args {
        let fname = arg.name;
        pushes.extend(quote! {
            sink.push(aal::FieldValue::from(* #fname))?;
        });
    }

    #[rustfmt::skip]
    quote! {
	#enum_name::#ident #pattern => {
	    #pushes
	},
    }
}

// Generate the code for converting the arguments of the action at position
// `idx` back into the original Enum::Action{args}.  This will look something
// like:
//     0usize => {
//         if fields.len() != 2usize { return Err(..) }
//         Ok(Action::SetTarget {
//             next_id: (&fields[0usize]).try_into().map_err(..)?,
//             duration: (&fields[1usize]).try_into().map_err(..)?,
//         })
//     }
fn get_action_decoder(
    enum_name: &Ident,
    idx: usize,
    action: &Action,
) -> TokenStream {
    let ident = action.name;
    let arity = action.action_args.len();

    let mut arg_tokens = TokenStream::new();
    if !action.action_args.is_empty() {
        let mut t = TokenStream::new();
        for (pos, arg) in action.action_args.iter().enumerate() {
            let name = arg.name;
            #[rustfmt::skip]
            t.extend(quote! {
	    #name: (&fields[#pos])
                .try_into()
                .map_err(|e| {
		    let msg = format!("failed to convert {}: {e:?}",
			stringify!(#name));
                    aal::AsicError::Decode(msg)
                })?,
	    });
        }
        arg_tokens = quote! { { #t } };
    }
    #[rustfmt::skip]
    quote! {
	#idx => {
	    if fields.len() != #arity {
		return Err(aal::AsicError::Decode(format!(
		    "{} takes {} arguments, found {}",
		    stringify!(#ident), #arity, fields.len())));
	    }
	    Ok( #enum_name::#ident #arg_tokens)
	},
    }
}

// Build the code that walks through the list of arguments to an action and
// converts the value of each argument to a string.  Like this:
//
//    match self {
//	    Action::SetTarget { next_id, duration } => {
//	        args.insert("next_id".to_string(), next_id.to_string());
//	        args.insert("duration".to_string(), duration.to_string());
//	    }
//	    Action::NoAction => {}
//    }
fn get_action_arg_converter(enum_name: &Ident, action: &Action) -> TokenStream {
    let ident = action.name;
    let pattern = get_arg_pattern(action);

    let mut arg_tokens = TokenStream::new();
    for arg in &action.action_args {
        let fname = arg.name;
        arg_tokens.extend(quote! {
            args.insert(stringify!(#fname).to_string(), #fname.to_string());
        });
    }

    quote! { #enum_name::#ident #pattern => { #arg_tokens }, }
}

// Parse a single a = b attribute into an (a, b) tuple
fn get_attribute(m: &Meta) -> Result<(String, String)> {
    let err = Error::new(m.span(), "malformed attribute".to_string());
    let nv = match m {
        Meta::NameValue(nv) => nv,
        _ => return Err(err),
    };
    let attr = match nv.path.segments.first() {
        Some(seg) => seg.ident.to_string(),
        None => return Err(err),
    };
    let val = match &nv.lit {
        Lit::Str(l) => l.value(),
        _ => return Err(err),
    };

    Ok((attr, val))
}

fn is_matching_attribute(a: &Attribute, family: &str) -> bool {
    if let Some(ps) = a.path.segments.first() {
        ps.ident == family
    } else {
        false
    }
}

// From a #[action_xlate(..)] or #[match_xlate(..)] directive, extract all of
// the 'attribute = "value"' pairs
fn get_attributes(
    span: proc_macro2::Span,
    family: &str,
    attrs: &[Attribute],
) -> Result<HashMap<String, String>> {
    let mut found = HashMap::new();

    let err = Error::new(span, "bad attribute list".to_string());
    for a in attrs {
        if is_matching_attribute(a, family) {
            let list = match a.parse_meta() {
                Ok(Meta::List(l)) => l,
                _ => return Err(err),
            };
            for i in list.nested.iter() {
                let m = match i {
                    NestedMeta::Meta(m) => m,
                    _ => return Err(err),
                };
                let (attr, val) = get_attribute(m)?;
                found.insert(attr, val);
            }
        }
    }
    Ok(found)
}

// Given a struct, return a vector representing each element of the struct as a
// FieldInfo, in declaration order.
fn get_fields<'a>(
    span: proc_macro2::Span,
    data: &'a Data,
    attr_name: &'static str,
) -> Result<Vec<FieldInfo<'a>>> {
    let named = match *data {
        Data::Struct(ref data) => match data.fields {
            Fields::Named(ref f) => &f.named,
            _ => {
                return Err(Error::new(
                    span,
                    "match keys must have named fields".to_string(),
                ))
            }
        },
        _ => {
            return Err(Error::new(
                span,
                "match keys must be structs".to_string(),
            ))
        }
    };

    let mut fields = Vec::new();
    for f in named.iter() {
        let name = match f.ident.as_ref() {
            Some(name) => name,
            None => {
                return Err(Error::new(f.span(), "unnamed field".to_string()))
            }
        };
        let attrs = get_attributes(f.span(), attr_name, &f.attrs)?;
        let field_name = match attrs.get("name") {
            Some(x) => x.clone(),
            None => name.to_string(),
        };

        fields.push(FieldInfo { name, field_name });
    }

    if fields.is_empty() {
        return Err(Error::new(span, "match key has no fields".to_string()));
    }
    Ok(fields)
}

// Parse all of the arguments to an action
fn get_action_args(variant: &Variant) -> Result<Vec<ActionArg>> {
    match variant.fields {
        Fields::Unit => Ok(Vec::new()),
        Fields::Named(ref f) => f
            .named
            .iter()
            .map(|arg| match arg.ident.as_ref() {
                Some(name) => Ok(ActionArg { name }),
                None => {
                    Err(Error::new(arg.span(), "unnamed argument".to_string()))
                }
            })
            .collect(),
        Fields::Unnamed(_) => Err(Error::new(
            variant.span(),
            "action arguments must be named".to_string(),
        )),
    }
}

// Given an enum, return a Vec with all of the possible actions and their
// arguments, in declaration order.
fn get_actions<'a>(
    span: proc_macro2::Span,
    data: &'a Data,
    attr_name: &'static str,
) -> Result<Vec<Action<'a>>> {
    let enum_variants = match *data {
        Data::Enum(ref e) => &e.variants,
        _ => {
            return Err(Error::new(span, "actions must be enums".to_string()))
        }
    };

    let mut actions = Vec::new();
    for v in enum_variants.iter() {
        let name = &v.ident;

        let attrs = get_attributes(v.span(), attr_name, &v.attrs)?;
        let action_name = match attrs.get("name") {
            Some(x) => x.clone(),
            None => name.to_string(),
        };

        let action_args = get_action_args(v)?;
        actions.push(Action {
            name,
            action_name,
            action_args,
        });
    }

    if actions.is_empty() {
        return Err(Error::new(span, "no actions defined".to_string()));
    }
    Ok(actions)
}

// For a single struct, derive the code needed to implement the MatchParse trait
// for it.
#[proc_macro_derive(MatchParse, attributes(match_xlate))]
pub fn derive_match_xlate(
    input: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = input.ident;

    let f = match get_fields(name.span(), &input.data, "match_xlate") {
        Ok(f) => f,
        Err(e) => return e.to_compile_error().into(),
    };

    let count = f.len();
    let encode_all = get_match_encoders(&f);
    let decode_all = get_match_decoder(&name, &f);
    let match_key_values = get_match_key_values(&f);

    #[rustfmt::skip]
    let post = quote! {
        impl aal::MatchParse for #name {
	    const FIELD_COUNT: usize = #count;

            fn key_values(&self) -> std::collections::BTreeMap<String, String> {
		let mut fields = std::collections::BTreeMap::new();
		#match_key_values

		fields
	    }

            fn key_encode<S: aal::FieldSink>(
		&self,
		sink: &mut S,
	    ) -> aal::AsicResult<()> {
		#encode_all
		Ok(())
	    }

            fn key_decode(fields: &[aal::FieldValue]) -> aal::AsicResult<Self> {
		if fields.len() != #count {
		    return Err(aal::AsicError::Decode(format!(
			"{} has {} fields, found {}",
			stringify!(#name), #count, fields.len())));
		}
		Ok( #decode_all )
	    }
	}
    };

    proc_macro::TokenStream::from(post)
}

// For an enum of actions, derive the code needed to implement the ActionParse
// trait for it.
#[proc_macro_derive(ActionParse, attributes(action_xlate))]
pub fn derive_action_xlate(
    input: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let enum_name = input.ident;

    // Parse the ActionParse enum to identify each action and its args
    let actions =
        match get_actions(enum_name.span(), &input.data, "action_xlate") {
            Ok(a) => a,
            Err(e) => return e.to_compile_error().into(),
        };

    // Iterate over all the possible actions for this table (as represented by
    // an ActionParse enum) and build the "match" arms that report each
    // action's position and name, encode its arguments, decode it back into
    // an enum, and return its arguments as strings.
    let mut arity = Vec::new();
    let mut action_index = TokenStream::new();
    let mut action_name = TokenStream::new();
    let mut encode_all = TokenStream::new();
    let mut decode_all = TokenStream::new();
    let mut action_args = TokenStream::new();
    for (idx, a) in actions.iter().enumerate() {
        let ident = a.name;
        let label = &a.action_name;
        let wildcard = get_wildcard_pattern(a);

        arity.push(a.action_args.len());
        action_index.extend(quote! { #enum_name::#ident #wildcard => #idx, });
        action_name.extend(quote! { #enum_name::#ident #wildcard => #label, });
        encode_all.extend(get_action_encoder(&enum_name, a));
        decode_all.extend(get_action_decoder(&enum_name, idx, a));
        action_args.extend(get_action_arg_converter(&enum_name, a));
    }

    #[rustfmt::skip]
    let post = quote! {
	impl aal::ActionParse for #enum_name {
	    const ARITY: &'static [usize] = &[ #(#arity),* ];

	    fn action_index(&self) -> usize {
		match self {
		    #action_index
		}
	    }

	    fn action_name(&self) -> &'static str {
		match self {
		    #action_name
		}
	    }

	    fn action_args(&self) -> std::collections::BTreeMap<String, String> {
		let mut args = std::collections::BTreeMap::new();
		match self {
		    #action_args
		}

		args
	    }

            fn action_encode<S: aal::FieldSink>(
		&self,
		sink: &mut S,
	    ) -> aal::AsicResult<()> {
		match self {
		    #encode_all
		};
		Ok(())
	    }

            fn action_decode(
		index: usize,
		fields: &[aal::FieldValue],
	    ) -> aal::AsicResult<Self> {
		match index {
		    #decode_all
		    x => Err(aal::AsicError::Decode(
			format!("found unknown action index: {x}"))),
		}
	    }
	}
    };

    proc_macro::TokenStream::from(post)
}
