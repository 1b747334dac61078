//! Ошибки edubus: типизированная [`BusError`] клиента шины, коды статуса и
//! [`StackError`] с цепочкой контекстов для прикладного кода.

pub mod ext;
pub mod macros;
pub mod stack;
pub mod status_code;
pub mod types;

pub use ext::*;
pub use macros::*;
pub use stack::*;
pub use status_code::*;
pub use types::*;

/// Результат прикладного уровня с цепочкой контекстов.
pub type EdubusResult<T> = Result<T, StackError>;

/// Результат операций клиента шины с типизированной ошибкой.
pub type BusResult<T> = Result<T, BusError>;
