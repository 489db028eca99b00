mod tests_block_cache;
mod tests_file_cache;
