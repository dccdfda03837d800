use proc_macro::TokenStream;
use proc_macro2::{Delimiter, Group, TokenTree};
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{Expr, Ident, ItemFn, Meta, Token};

struct ProgressArgs {
    message: Expr,
    finished: Option<Expr>,
}

impl Parse for ProgressArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut message = None;
        let mut finished = None;

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match key.to_string().as_str() {
                "message" => message = Some(input.parse::<Expr>()?),
                "finished" => finished = Some(input.parse::<Expr>()?),
                _ => {
                    return Err(syn::Error::new(
                        key.span(),
                        format!("unknown argument `{key}`, expected `message` or `finished`"),
                    ));
                }
            }

            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }

        let message = message.ok_or_else(|| input.error("missing `message` argument"))?;
        Ok(Self { message, finished })
    }
}

pub fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match syn::parse::<ProgressArgs>(attr) {
        Ok(args) => args,
        Err(error) => return error.to_compile_error().into(),
    };
    let mut function = match syn::parse::<ItemFn>(item) {
        Ok(function) => function,
        Err(error) => return error.to_compile_error().into(),
    };

    if !mark_instrument_as_progress(&mut function) {
        function
            .attrs
            .push(syn::parse_quote!(#[tracing::instrument(fields(progress = true))]));
    }

    let message = &args.message;
    let set_finished = args.finished.as_ref().map(|finished| {
        quote!(__progress_span.pb_set_finish_message(&#finished);)
    });

    let body = std::mem::take(&mut function.block.stmts);
    function.block = syn::parse_quote!({
        {
            use tracing_indicatif::span_ext::IndicatifSpanExt as _;
            let __progress_span = tracing::Span::current();
            __progress_span.pb_set_message(&#message);
            #set_finished
        }
        #(#body)*
    });

    quote!(#function).into()
}

/// Adds `progress = true` to the first `#[instrument]` attribute.
///
/// Returns `false` when the function carries no `#[instrument]`.
fn mark_instrument_as_progress(function: &mut ItemFn) -> bool {
    let Some(attr) = function
        .attrs
        .iter_mut()
        .find(|attr| attr.path().is_ident("instrument"))
    else {
        return false;
    };

    match &attr.meta {
        Meta::List(list) => {
            let tokens = with_progress_field(list.tokens.clone());
            *attr = syn::parse_quote!(#[instrument(#tokens)]);
        }
        Meta::Path(_) => {
            *attr = syn::parse_quote!(#[instrument(fields(progress = true))]);
        }
        Meta::NameValue(_) => return false,
    }

    true
}

/// Rewrites `instrument(...)` arguments so `fields(...)` contains `progress = true`.
fn with_progress_field(tokens: proc_macro2::TokenStream) -> proc_macro2::TokenStream {
    let trees: Vec<TokenTree> = tokens.into_iter().collect();
    let mut rewritten = Vec::with_capacity(trees.len() + 2);
    let mut saw_fields = false;
    let mut index = 0;

    while let Some(tree) = trees.get(index) {
        let fields_group = match (tree, trees.get(index + 1)) {
            (TokenTree::Ident(ident), Some(TokenTree::Group(group)))
                if ident == "fields" && group.delimiter() == Delimiter::Parenthesis =>
            {
                Some(group)
            }
            _ => None,
        };

        let Some(group) = fields_group else {
            rewritten.push(tree.clone());
            index += 1;
            continue;
        };

        saw_fields = true;
        let inner = group.stream();
        let merged = if inner.is_empty() {
            quote!(progress = true)
        } else {
            quote!(#inner, progress = true)
        };
        rewritten.push(tree.clone());
        rewritten.push(TokenTree::Group(Group::new(Delimiter::Parenthesis, merged)));
        index += 2;
    }

    let rewritten: proc_macro2::TokenStream = rewritten.into_iter().collect();
    if saw_fields {
        rewritten
    } else if rewritten.is_empty() {
        quote!(fields(progress = true))
    } else {
        quote!(#rewritten, fields(progress = true))
    }
}
