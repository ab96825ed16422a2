fn main() {
    jobpen::main()
}
