use crate::StackError;

/// Возвращает из функции `Err(StackError)`.
///
/// `bail!(err)` принимает любую ошибку с [`ErrorExt`](crate::ErrorExt).
/// `bail!(code, "fmt", args..)` строит [`GenericError`](crate::GenericError)
/// с кодом статуса.
#[macro_export]
macro_rules! bail {
    ($err:expr $(,)?) => {
        return Err($crate::StackError::from($err))
    };
    ($code:expr, $($fmt:tt)+) => {
        return Err($crate::StackError::new($crate::GenericError::new(
            $code,
            format!($($fmt)+),
        )))
    };
}

/// `bail!`, если условие ложно. Формы те же, что у [`bail!`].
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $($rest:tt)+) => {
        if !($cond) {
            $crate::bail!($($rest)+);
        }
    };
}

/// Контекст для `Result` с ошибкой, приводимой к [`StackError`].
pub trait ResultExt<T> {
    fn context(
        self,
        ctx: impl Into<String>,
    ) -> Result<T, StackError>;

    /// Контекст строится только при ошибке.
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E: Into<StackError>> ResultExt<T> for Result<T, E> {
    #[track_caller]
    fn context(
        self,
        ctx: impl Into<String>,
    ) -> Result<T, StackError> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(e.into().context(ctx)),
        }
    }

    #[track_caller]
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(e.into().context(f())),
        }
    }
}
