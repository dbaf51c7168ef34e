/// Opens the root span of a unit of work. An enabled parent is
/// always attached to, otherwise the span is created for roughly
/// `sample_percent` (0.0 to 1.0) of calls and is `Span::none()` for
/// the rest, so the `child_span_*` macros below it are skipped too.
///
/// # Examples
/// ```ignore
/// let span = sample_or_attach_root_span!(0.01, "auction", pub_id = %pub_id);
/// run_auction().instrument(span).await;
/// ```
#[macro_export]
macro_rules! sample_or_attach_root_span {
    ($sample_percent:expr, $span_name:literal) => {{
        if !::tracing::Span::current().is_disabled()
            || ::rand::random::<f32>() < $sample_percent
        {
            ::tracing::info_span!($span_name)
        } else {
            ::tracing::Span::none()
        }
    }};
    ($sample_percent:expr, $span_name:literal, $($fields:tt)*) => {{
        if !::tracing::Span::current().is_disabled()
            || ::rand::random::<f32>() < $sample_percent
        {
            ::tracing::info_span!($span_name, $($fields)*)
        } else {
            ::tracing::Span::none()
        }
    }};
}

/// Creates a DEBUG-level child span only if the current span is enabled,
/// so unsampled requests pay nothing for span bookkeeping.
///
/// Returns an **un-entered** `Span`, use `.entered()` or `.instrument()`.
///
/// # Examples
/// ```ignore
/// let span = child_span_debug!("make_requests", imps = request.imp.len());
/// let _enter = span.entered();
/// ```
#[macro_export]
macro_rules! child_span_debug {
    ($span_name:literal) => {{
        if !::tracing::Span::current().is_disabled() {
            ::tracing::debug_span!($span_name)
        } else {
            ::tracing::Span::none()
        }
    }};
    ($span_name:literal, $($fields:tt)*) => {{
        if !::tracing::Span::current().is_disabled() {
            ::tracing::debug_span!($span_name, $($fields)*)
        } else {
            ::tracing::Span::none()
        }
    }};
}

/// INFO-level variant of [`child_span_debug!`]
///
/// # Examples
/// ```ignore
/// let span = child_span_info!("parse_request", request_status = tracing::field::Empty);
/// parse(body).instrument(span.clone()).await;
/// span.record("request_status", "ok");
/// ```
#[macro_export]
macro_rules! child_span_info {
    ($span_name:literal) => {{
        if !::tracing::Span::current().is_disabled() {
            ::tracing::info_span!($span_name)
        } else {
            ::tracing::Span::none()
        }
    }};
    ($span_name:literal, $($fields:tt)*) => {{
        if !::tracing::Span::current().is_disabled() {
            ::tracing::info_span!($span_name, $($fields)*)
        } else {
            ::tracing::Span::none()
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_no_parent_span_yields_disabled_span() {
        let span = child_span_info!("orphan", field = 1);
        assert!(span.is_disabled());

        let span = child_span_debug!("orphan");
        assert!(span.is_disabled());
    }

    #[test]
    fn test_root_span_sampling() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            assert!(sample_or_attach_root_span!(0.0, "never").is_disabled());

            let root = sample_or_attach_root_span!(1.0, "always", attempt = 1);
            assert!(!root.is_disabled());

            let _entered = root.enter();
            assert!(!sample_or_attach_root_span!(0.0, "attached").is_disabled());
            assert!(!child_span_info!("child").is_disabled());
        });
    }
}
