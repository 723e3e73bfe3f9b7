//! End-to-end scenarios across procsim-core, procsim-expr and procsim-stats.
//! Everything lives in `tests/`.
