fn main() {
    clipgist_lib::run()
}
