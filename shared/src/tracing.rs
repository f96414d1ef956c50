/// Initialize tracing using the calling crate's package name.
///
/// `RUST_LOG` wins when set. Otherwise the calling crate logs at `info` and the
/// Discord libraries only report warnings.
#[macro_export]
macro_rules! init_tracing {
    () => {{
        use $crate::__private::tracing_subscriber::{
            EnvFilter, fmt::format::FmtSpan, layer::SubscriberExt as _,
            util::SubscriberInitExt as _,
        };

        let default_directives = format!(
            "{}=info,shared=info,serenity=warn,poise=warn",
            env!("CARGO_PKG_NAME").replace("-", "_"),
        );
        let filter = || {
            EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&default_directives))
        };

        match $crate::__private::tracing_journald::layer() {
            Ok(journald_layer) => $crate::__private::tracing_subscriber::registry()
                .with(filter()?)
                .with(journald_layer)
                .init(),
            Err(_) => $crate::__private::tracing_subscriber::registry()
                .with(filter()?)
                .with(
                    $crate::__private::tracing_subscriber::fmt::layer()
                        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE),
                )
                .init(),
        };

        Ok::<(), $crate::__private::anyhow::Error>(())
    }};
}
