pub fn execute() {
    println!("nsattach {}", nsattach::version());
}
