/// Errors that only affect a single decoded item of a stream, after which the
/// stream itself can still be read.
pub fn is_recoverable_error(e: &bollard::errors::Error) -> bool {
    matches!(
        &e,
        bollard::errors::Error::JsonDataError { .. }
            | bollard::errors::Error::JsonSerdeError { .. }
            | bollard::errors::Error::StrParseError { .. }
            | bollard::errors::Error::StrFmtError { .. }
            | bollard::errors::Error::URLEncodedError { .. }
    )
}

/// The daemon answered with `status`.
pub fn is_status(e: &bollard::errors::Error, status: u16) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == status
    )
}

/// The container no longer exists, is not running, or is already being
/// removed (404 / 409).
pub fn is_container_gone(e: &bollard::errors::Error) -> bool {
    is_status(e, 404) || is_status(e, 409)
}
