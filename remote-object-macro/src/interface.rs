// Copyright 2020 Kodebox, Inc.
// This file is part of CodeChain.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use proc_macro2::{Literal, Span, TokenStream as TokenStream2};
use quote::quote;
use syn::spanned::Spanned;
use syn::{FnArg, GenericArgument, Ident, ItemTrait, Lit, Meta, NestedMeta, PathArguments, ReturnType, TraitItem, Type};

struct Method {
    ident: Ident,
    wire_name: String,
    args: Vec<Type>,
    ok_type: Type,
    output: ReturnType,
}

fn crate_path() -> syn::Path {
    let name = proc_macro_crate::crate_name("remote-object").unwrap_or_else(|_| "remote_object".to_owned());
    syn::parse_str(&name).unwrap_or_else(|_| syn::parse_quote!(remote_object))
}

/// Takes `#[remote(name = "...")]` off the method, returning the name.
fn take_wire_name(method: &mut syn::TraitItemMethod) -> syn::Result<Option<String>> {
    let mut wire_name = None;
    let mut kept = Vec::new();
    for attr in method.attrs.drain(..) {
        if !attr.path.is_ident("remote") {
            kept.push(attr);
            continue
        }
        let list = match attr.parse_meta()? {
            Meta::List(x) => x,
            x => return Err(syn::Error::new_spanned(x, "expected #[remote(name = \"...\")]")),
        };
        for nested in list.nested {
            match nested {
                NestedMeta::Meta(Meta::NameValue(x)) if x.path.is_ident("name") => match x.lit {
                    Lit::Str(s) => wire_name = Some(s.value()),
                    lit => return Err(syn::Error::new_spanned(lit, "name must be a string")),
                },
                x => return Err(syn::Error::new_spanned(x, "unknown remote attribute")),
            }
        }
    }
    method.attrs = kept;
    Ok(wire_name)
}

/// `Result<T, E>` or `Result<T>` gives `T`.
fn ok_type(output: &ReturnType) -> syn::Result<Type> {
    let error = || syn::Error::new(output.span(), "interface methods must return a Result");
    let ty = match output {
        ReturnType::Type(_, ty) => ty,
        ReturnType::Default => return Err(error()),
    };
    let segment = match &**ty {
        Type::Path(x) => x.path.segments.last().ok_or_else(error)?,
        _ => return Err(error()),
    };
    if segment.ident != "Result" {
        return Err(error())
    }
    match &segment.arguments {
        PathArguments::AngleBracketed(x) => match x.args.first() {
            Some(GenericArgument::Type(t)) => Ok(t.clone()),
            _ => Err(error()),
        },
        _ => Err(error()),
    }
}

impl Method {
    fn parse(method: &mut syn::TraitItemMethod) -> syn::Result<Self> {
        let wire_name = take_wire_name(method)?;
        let sig = &method.sig;
        if !sig.generics.params.is_empty() {
            return Err(syn::Error::new_spanned(&sig.generics, "interface methods can't be generic"))
        }
        let mut inputs = sig.inputs.iter();
        match inputs.next() {
            Some(FnArg::Receiver(x)) if x.reference.is_some() && x.mutability.is_none() => (),
            _ => return Err(syn::Error::new_spanned(sig, "interface methods must take &self")),
        }
        let mut args = Vec::new();
        for input in inputs {
            match input {
                FnArg::Typed(x) => match &*x.ty {
                    Type::Reference(_) => {
                        return Err(syn::Error::new_spanned(&x.ty, "interface arguments must be passed by value"))
                    }
                    ty => args.push(ty.clone()),
                },
                FnArg::Receiver(x) => return Err(syn::Error::new_spanned(x, "unexpected receiver")),
            }
        }
        Ok(Method {
            ident: sig.ident.clone(),
            wire_name: wire_name.unwrap_or_else(|| sig.ident.to_string()),
            args,
            ok_type: ok_type(&sig.output)?,
            output: sig.output.clone(),
        })
    }
}

pub fn expand(args: TokenStream2, input: TokenStream2) -> syn::Result<TokenStream2> {
    if !args.is_empty() {
        return Err(syn::Error::new_spanned(args, "#[interface] takes no arguments"))
    }
    let mut source: ItemTrait = syn::parse2(input)?;
    if !source.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(&source.generics, "interfaces can't be generic"))
    }

    let mut methods = Vec::new();
    for item in source.items.iter_mut() {
        match item {
            TraitItem::Method(x) => methods.push(Method::parse(x)?),
            TraitItem::Type(x) => return Err(syn::Error::new_spanned(x, "interfaces can't have associated types")),
            TraitItem::Const(x) => return Err(syn::Error::new_spanned(x, "interfaces can't have associated consts")),
            _ => (),
        }
    }
    if methods.len() > u8::MAX as usize {
        return Err(syn::Error::new_spanned(&source.ident, "interfaces can have at most 255 methods"))
    }

    let krate = crate_path();
    let trait_ident = &source.ident;
    let proxy_ident = Ident::new(&format!("{}RemoteProxy", trait_ident), Span::call_site());

    let descriptors = methods.iter().map(|m| {
        let wire_name = &m.wire_name;
        let args = &m.args;
        let ok_type = &m.ok_type;
        quote! {
            #krate::macro_env::MethodDescriptor::new(
                #wire_name,
                ::std::vec![#(types.code_of::<#args>()?),*],
                types.code_of::<#ok_type>()?,
            )
        }
    });

    let dispatch_arms = methods.iter().enumerate().map(|(index, m)| {
        let index = Literal::u16_unsuffixed(index as u16);
        let ident = &m.ident;
        let wire_name = &m.wire_name;
        let arity = m.args.len();
        let names: Vec<_> = (0..arity).map(|i| Ident::new(&format!("__arg{}", i), Span::call_site())).collect();
        let args = &m.args;
        quote! {
            #index => {
                #krate::macro_env::check_arity(#wire_name, &args, #arity)?;
                let mut args = args.into_iter();
                #(let #names: #args = #krate::macro_env::take_arg(&mut args, types)?;)*
                match target.#ident(#(#names),*) {
                    ::std::result::Result::Ok(value) => types.encode(&value),
                    ::std::result::Result::Err(e) => ::std::result::Result::Err(#krate::macro_env::target_failure(e)),
                }
            }
        }
    });

    let proxy_methods = methods.iter().enumerate().map(|(index, m)| {
        let index = Literal::usize_unsuffixed(index);
        let ident = &m.ident;
        let names: Vec<_> = (0..m.args.len()).map(|i| Ident::new(&format!("__arg{}", i), Span::call_site())).collect();
        let args = &m.args;
        let ok_type = &m.ok_type;
        let output = &m.output;
        quote! {
            fn #ident(&self, #(#names: #args),*) #output {
                let result: #krate::macro_env::Result<#ok_type> = (|| {
                    let args = ::std::vec![#(self.handle.encode_arg(&#names)?),*];
                    self.handle.call::<#ok_type>(#index, args)
                })();
                result.map_err(::std::convert::From::from)
            }
        }
    });

    let trait_name = trait_ident.to_string();
    Ok(quote! {
        #source

        impl #krate::macro_env::RemoteInterface for dyn #trait_ident {
            fn interface_name() -> &'static str {
                ::std::concat!(::std::module_path!(), "::", #trait_name)
            }

            fn methods(
                types: &#krate::macro_env::TypeRegistry,
            ) -> #krate::macro_env::Result<::std::vec::Vec<#krate::macro_env::MethodDescriptor>> {
                ::std::result::Result::Ok(::std::vec![#(#descriptors),*])
            }

            #[allow(unused_mut, unused_variables)]
            fn dispatch(
                target: &Self,
                method: #krate::macro_env::MethodId,
                args: ::std::vec::Vec<::std::option::Option<#krate::macro_env::Value>>,
                types: &#krate::macro_env::TypeRegistry,
            ) -> #krate::macro_env::Result<::std::option::Option<#krate::macro_env::Value>> {
                match method {
                    #(#dispatch_arms)*
                    _ => ::std::result::Result::Err(#krate::macro_env::Error::NotImplemented(
                        ::std::format!("{} has no method {}", #trait_name, method),
                    )),
                }
            }

            fn proxy(handle: #krate::macro_env::RemoteHandle) -> ::std::boxed::Box<Self> {
                ::std::boxed::Box::new(#proxy_ident {
                    handle,
                })
            }
        }

        #[doc(hidden)]
        #[derive(Debug)]
        struct #proxy_ident {
            handle: #krate::macro_env::RemoteHandle,
        }

        impl #trait_ident for #proxy_ident {
            #(#proxy_methods)*
        }
    })
}
