use proc_macro::TokenStream;

mod progress;

/// Marks an instrumented function as a progress span.
///
/// The span is rendered as a spinner by the `tracing-indicatif` layer while the
/// function runs. `message` is shown while the span is open and the optional
/// `finished` expression replaces it once the span closes.
///
/// Place the attribute above `#[instrument]` so the `progress = true` field is
/// merged into the existing instrumentation instead of adding a second span.
#[proc_macro_attribute]
pub fn progress(attr: TokenStream, item: TokenStream) -> TokenStream {
    progress::expand(attr, item)
}
