// Market data module entrypoint
pub mod adapters;   // one reader per provider
pub mod normaliser; // wire strings/numbers/stamps -> domain values
pub mod router;     // builds feeds from settings and runs them together
pub mod types;      // common records + per-item outcomes
