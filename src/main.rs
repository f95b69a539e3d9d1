fn main() {
    std::process::exit(sql_query_lib::run())
}
