pub type Result<T> = std::result::Result<T, crate::error::Error>;

/// Fails the enclosing function with an argument error when `expr` is false.
#[macro_export]
macro_rules! verify_arg {
    ($name:expr, $expr:expr) => {{
        let ok = $expr;
        $crate::result::verify_arg(ok, stringify!($name), stringify!($expr))?;
    }};
}

/// Fails the enclosing function with a format error when `expr` is false.
#[macro_export]
macro_rules! verify_data {
    ($name:expr, $expr:expr) => {{
        let ok = $expr;
        $crate::result::verify_data(ok, stringify!($name), stringify!($expr))?;
    }};
}

#[inline]
pub fn verify_arg(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_arg(name, condition)
    }
}

#[inline]
pub fn verify_data(predicate: bool, name: &str, condition: &str) -> Result<()> {
    if predicate {
        Ok(())
    } else {
        invalid_format(name, condition)
    }
}

#[cold]
pub fn invalid_arg(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::Error::invalid_arg(
        name,
        format!("expected {condition}"),
    ))
}

#[cold]
pub fn invalid_format(name: &str, condition: &str) -> Result<()> {
    Err(crate::error::Error::invalid_format(
        name,
        format!("expected {condition}"),
    ))
}
