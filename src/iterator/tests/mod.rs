mod helpers;
mod tests_merged;
