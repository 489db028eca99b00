mod helpers;
mod tests_concurrent;
mod tests_edge;
