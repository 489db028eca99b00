mod tests_build_open;
