use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, FnArg, ItemFn, LitInt, Pat};

/// Time a function when the `perf_stats` feature is enabled.
///
/// Logs a warning through bevy's `warn!` when a call takes longer than the
/// threshold (milliseconds, default 1). If the function takes a parameter
/// named `world`, its `Display` output is included so slow searches can be
/// attributed to a world.
///
/// ```ignore
/// #[profile(2)]
/// pub fn find_best_cluster_for(&self, world: &WorldId, /* ... */) { /* ... */ }
/// ```
///
/// Without the feature the guard is compiled out entirely.
#[proc_macro_attribute]
pub fn profile(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let threshold_ms: u128 = if attr.is_empty() {
        1
    } else {
        let lit = parse_macro_input!(attr as LitInt);
        match lit.base10_parse() {
            Ok(value) => value,
            Err(e) => return e.to_compile_error().into(),
        }
    };

    let ItemFn { attrs, vis, sig, block } = &input;
    let fn_name = sig.ident.to_string();

    let has_world_param = sig.inputs.iter().any(|arg| match arg {
        FnArg::Typed(pat_type) => matches!(&*pat_type.pat, Pat::Ident(ident) if ident.ident == "world"),
        FnArg::Receiver(_) => false,
    });

    let label = if has_world_param {
        quote! { format!("{} ({})", #fn_name, world) }
    } else {
        quote! { String::from(#fn_name) }
    };

    let output = quote! {
        #(#attrs)*
        #vis #sig {
            #[cfg(feature = "perf_stats")]
            let _profile_guard = {
                struct ProfileGuard {
                    label: String,
                    start: std::time::Instant,
                }
                impl Drop for ProfileGuard {
                    fn drop(&mut self) {
                        let elapsed = self.start.elapsed();
                        if elapsed.as_millis() > #threshold_ms {
                            bevy::prelude::warn!("[PERF] {} took {:?}", self.label, elapsed);
                        } else {
                            bevy::prelude::debug!("[PERF] {} took {:?}", self.label, elapsed);
                        }
                    }
                }
                ProfileGuard {
                    label: #label,
                    start: std::time::Instant::now(),
                }
            };

            #block
        }
    };

    output.into()
}
