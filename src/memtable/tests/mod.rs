mod tests_apply;
mod tests_iter;
