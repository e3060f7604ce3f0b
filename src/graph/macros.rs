//! Macro for convenient statement construction.

/// Builds a [`Statement`](crate::graph::Statement) with optional parameters.
///
/// # Usage
///
/// ```ignore
/// use graphbolt::statement;
///
/// // Statement without parameters
/// let statement = statement!("MATCH (n) RETURN n");
///
/// // Statement with parameters
/// let statement = statement!(
///     "MATCH (n) WHERE n.id = $id AND n.name = $name RETURN n",
///     id = entity_id,
///     name = entity_name
/// );
///
/// let cursor = session.run(statement).await?;
/// ```
#[macro_export]
macro_rules! statement {
    // Statement without parameters
    ($text:expr) => {
        $crate::graph::Statement::new($text)
    };
    // Statement with parameters
    ($text:expr, $($name:ident = $value:expr),+ $(,)?) => {
        $crate::graph::Statement::new($text)$(.param(stringify!($name), $value))+
    };
}
