fn main() {
    rtc_console_lib::run()
}
