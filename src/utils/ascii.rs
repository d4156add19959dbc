pub fn print_startup_banner() {
    let year = chrono::Local::now().format("%Y").to_string();

    // ANSI color codes
    let teal = "\x1B[38;5;37m";
    let gray = "\x1B[38;5;245m";
    let gold = "\x1B[38;5;178m";
    let reset = "\x1B[0m";

    println!(
        r#"
  {year} salesfeed
   {teal}
     |||||||||||||||||||||||
     |=====================|     {gray}warp and weft,{teal}
     |  |  |  |  |  |  |  |
     |=====================|     {gray}thread by thread,{teal}
     |  |  |  |  |  |  |  |
     |=====================|     {gray}the day's sales{teal}
     |||||||||||||||||||||||     {gray}woven fresh{teal}
          \___________/
         {gold}salesfeed v{version}{reset}
"#,
        year = year,
        teal = teal,
        gray = gray,
        gold = gold,
        reset = reset,
        version = env!("CARGO_PKG_VERSION"),
    );
}
