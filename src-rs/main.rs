use anyhow::{anyhow, bail, Context, Result};
use arboard::Clipboard;
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use dialoguer::{Confirm, Input};
use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const DEFAULT_COORDS_FILE: &str = "js_coords.txt";

const COL_PRES_LIST: &str = "Pres List";
const COL_RECALL_LIST: &str = "Recall List";
const COL_HEADLINE: &str = "Headline";
const COL_CONTROLLED: &str = "Edited, controlled stimuli";

const RECALL_PROBE: &str = "Did you see this EXACT headline?";

const PRESENTATION_HOOK_JS: &str = r##"// Timer code for presentation
Qualtrics.SurveyEngine.addOnload(function() {
    var questionId;
    try {
        var questionInfo = this.getQuestionInfo();
        questionId = questionInfo ? questionInfo.QuestionID : null;
    } catch(e) {
        console.error("Failed to get question ID:", e);
        return;
    }

    if (!questionId) {
        console.error("No question ID available, cannot continue");
        return;
    }

    this.questionId = questionId;

    if (window.autoAdvanceController) {
        window.autoAdvanceController.setupQuestion(questionId, this);
    } else {
        console.error("Auto-advance controller not found! Add controller code to survey header.");
    }
});

Qualtrics.SurveyEngine.addOnUnload(function() {
    var questionId = this.questionId;

    if (questionId && window.autoAdvanceController) {
        window.autoAdvanceController.cleanupQuestion(questionId);
    }
});"##;

const RECALL_TIMER_JS: &str = r##"// Timer code for recall mode
Qualtrics.SurveyEngine.addOnload(function() {
    var questionId;
    try {
        var questionInfo = this.getQuestionInfo();
        questionId = questionInfo ? questionInfo.QuestionID : null;
    } catch(e) {
        console.error("Failed to get question ID:", e);
        return;
    }

    if (!questionId) {
        console.error("No question ID available, cannot continue");
        return;
    }

    this.questionId = questionId;

    var timerDisplay = document.createElement('div');
    timerDisplay.id = 'timer-display';
    timerDisplay.style.cssText = 'font-size: 18px; font-weight: bold; color: #333; margin: 10px 0;';
    timerDisplay.innerHTML = 'Time remaining: 60 seconds';

    var questionContainer = document.querySelector('.QuestionText');
    if (questionContainer) {
        questionContainer.parentNode.insertBefore(timerDisplay, questionContainer.nextSibling);
    }

    var timeLeft = 60;
    var timerId = setInterval(function() {
        timeLeft--;
        if (timerDisplay) {
            timerDisplay.innerHTML = 'Time remaining: ' + timeLeft + ' seconds';

            if (timeLeft <= 10) {
                timerDisplay.style.color = '#d9534f';
            }
        }

        if (timeLeft <= 0) {
            clearInterval(timerId);
            try {
                Qualtrics.SurveyEngine.navClick('NextButton');
            } catch(e) {
                console.log("Unable to advance automatically");
            }
        }
    }, 1000);

    if (window.autoAdvanceController) {
        window.autoAdvanceController.setupQuestion(questionId, this);
    } else {
        console.error("Auto-advance controller not found! Add controller code to survey header.");
    }
});

Qualtrics.SurveyEngine.addOnUnload(function() {
    var questionId = this.questionId;

    if (questionId && window.autoAdvanceController) {
        window.autoAdvanceController.cleanupQuestion(questionId);
    }
});"##;

#[derive(Parser, Debug)]
#[command(
    name = "qual-insert",
    version,
    about = "Bulk-loads survey headlines into the Qualtrics editor by replaying clipboard, keyboard, and mouse input"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Paste headlines question by question, with per-question code injection via recorded landmark clicks
    Insert(InsertArgs),
    /// Keyboard-only variant: paste each headline and walk to the next question with a fixed key sequence
    Basic(BasicArgs),
    /// Record the five editor landmark coordinates interactively and write them to disk
    Calibrate(CalibrateArgs),
    /// Print the filtered headline selection as JSON without touching the screen
    Plan(PlanArgs),
}

#[derive(Args, Debug)]
struct InsertArgs {
    /// Headline type to process
    #[arg(long = "type", value_enum)]
    category: Category,
    /// Filter on the "Recall List" column instead of "Pres List" and inject the countdown variant
    #[arg(long, action = ArgAction::SetTrue)]
    recall: bool,
    /// Tab-delimited input file
    #[arg(long, default_value = "data.txt")]
    file: PathBuf,
    /// Pause between UI steps, in seconds
    #[arg(long, default_value_t = 0.5, value_parser = parse_delay)]
    delay: f64,
    /// Prefer the "Edited, controlled stimuli" text when present
    #[arg(long, action = ArgAction::SetTrue)]
    controlled: bool,
    /// Tab presses needed to land in the headline field after entering a question
    #[arg(long, default_value_t = 3)]
    tabs: usize,
    /// Skip the "keep going?" prompt every 10 headlines
    #[arg(long, action = ArgAction::SetTrue)]
    no_confirm: bool,
    /// Skip code injection entirely
    #[arg(long, action = ArgAction::SetTrue)]
    no_js: bool,
    /// Inject code but leave the headline text alone
    #[arg(long, action = ArgAction::SetTrue)]
    js_only: bool,
    /// Process at most this many headlines (0 = no limit)
    #[arg(long, default_value_t = 0)]
    limit: usize,
    /// Landmark coordinate file recorded by `calibrate`
    #[arg(long, default_value = DEFAULT_COORDS_FILE)]
    coords: PathBuf,
}

#[derive(Args, Debug)]
struct BasicArgs {
    /// Headline type to process
    #[arg(long = "type", value_enum)]
    category: Category,
    /// Filter on the "Recall List" column and append the recall probe under each headline
    #[arg(long, action = ArgAction::SetTrue)]
    recall: bool,
    /// Tab-delimited input file
    #[arg(long, default_value = "data.txt")]
    file: PathBuf,
    /// Pause between UI steps, in seconds
    #[arg(long, default_value_t = 0.2, value_parser = parse_delay)]
    delay: f64,
    /// Process at most this many headlines (0 = no limit)
    #[arg(long, default_value_t = 0)]
    limit: usize,
}

#[derive(Args, Debug)]
struct CalibrateArgs {
    /// Where to write the recorded coordinates
    #[arg(long, default_value = DEFAULT_COORDS_FILE)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Headline type to select
    #[arg(long = "type", value_enum)]
    category: Category,
    /// Select on the "Recall List" column instead of "Pres List"
    #[arg(long, action = ArgAction::SetTrue)]
    recall: bool,
    /// Prefer the "Edited, controlled stimuli" text when present
    #[arg(long, action = ArgAction::SetTrue)]
    controlled: bool,
    /// Tab-delimited input file
    #[arg(long, default_value = "data.txt")]
    file: PathBuf,
    /// Cap the selection at this many entries (0 = no limit)
    #[arg(long, default_value_t = 0)]
    limit: usize,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    arm_interrupt_handler()?;

    match cli.command {
        Commands::Insert(args) => command_insert(args),
        Commands::Basic(args) => command_basic(args),
        Commands::Calibrate(args) => command_calibrate(args),
        Commands::Plan(args) => command_plan(args),
    }
}

fn command_insert(args: InsertArgs) -> Result<()> {
    let mut landmarks = None;
    if !args.no_js {
        match Landmarks::load(&args.coords) {
            Ok(found) => {
                println!("loaded landmark coordinates from {}", args.coords.display());
                landmarks = Some(found);
            }
            Err(err) => {
                eprintln!("could not load landmark coordinates: {err:#}");
                eprintln!("run `qual-insert calibrate` first to record them.");
                if !confirm("continue without code injection?")? {
                    println!("aborted.");
                    return Ok(());
                }
            }
        }
    }

    let rows = load_rows(&args.file)?;
    println!("loaded {} rows from {}", rows.len(), args.file.display());

    let mut headlines = select_headlines(&rows, args.category, args.recall, args.controlled);
    if args.limit > 0 && headlines.len() > args.limit {
        headlines.truncate(args.limit);
        println!("limited to {} headlines", args.limit);
    }
    if headlines.is_empty() {
        println!("no rows match type {}", args.category);
        return Ok(());
    }

    let total = headlines.len();
    let stop_line =
        |done: usize| println!("\ninterrupted - stopped after {done} of {total} headlines");

    prompt_enter("put the cursor IN THE TEXT FIELD of the first question, then press enter here")?;
    if !countdown() {
        stop_line(0);
        return Ok(());
    }

    let mut driver = ReplayDriver::new(args.delay)?;

    for (idx, headline) in headlines.iter().enumerate() {
        if interrupted() {
            stop_line(idx);
            return Ok(());
        }

        if idx > 0 && idx % 10 == 0 && !args.no_confirm {
            if !confirm(&format!("did {idx} headlines so far, keep going?"))? {
                println!("stopping at {idx}");
                return Ok(());
            }
            if interrupted() {
                stop_line(idx);
                return Ok(());
            }
        }

        println!("#{}/{}: '{}'", idx + 1, total, truncate_text(headline, 30));

        if !args.js_only && !driver.replace_field_text(headline)? {
            stop_line(idx);
            return Ok(());
        }

        let completed = match landmarks {
            Some(marks) => {
                println!("adding code to question #{}", idx + 1);
                driver.inject_question_code(&marks, idx, args.recall, args.tabs)?
            }
            None => {
                if idx + 1 < total {
                    driver.advance_to_next(args.tabs)?
                } else {
                    true
                }
            }
        };
        if !completed {
            stop_line(idx);
            return Ok(());
        }
    }

    println!("done - processed {total} headlines.");
    Ok(())
}

fn command_basic(args: BasicArgs) -> Result<()> {
    let rows = load_rows(&args.file)?;
    println!("loaded {} rows from {}", rows.len(), args.file.display());

    // The basic variant always pastes the raw headline text.
    let mut headlines = select_headlines(&rows, args.category, args.recall, false);
    if args.limit > 0 && headlines.len() > args.limit {
        headlines.truncate(args.limit);
        println!("limited to {} headlines", args.limit);
    }
    if headlines.is_empty() {
        println!("no rows match type {}", args.category);
        return Ok(());
    }

    let total = headlines.len();
    let stop_line =
        |done: usize| println!("\ninterrupted - stopped after {done} of {total} headlines");

    prompt_enter("put the cursor IN THE TEXT FIELD of the first question, then press enter here")?;
    if !countdown() {
        stop_line(0);
        return Ok(());
    }

    let mut driver = ReplayDriver::new(args.delay)?;
    let tabs = if args.recall { 4 } else { 3 };

    for (idx, headline) in headlines.iter().enumerate() {
        if interrupted() {
            stop_line(idx);
            return Ok(());
        }

        println!("#{}/{}: '{}'", idx + 1, total, truncate_text(headline, 30));

        if !driver.pause() {
            stop_line(idx);
            return Ok(());
        }
        driver.set_clipboard(headline)?;
        driver.paste_and_step()?;
        if !driver.pause() {
            stop_line(idx);
            return Ok(());
        }

        if args.recall {
            driver.append_probe()?;
            if !driver.pause() {
                stop_line(idx);
                return Ok(());
            }
        }

        if !driver.advance_basic(tabs)? {
            stop_line(idx);
            return Ok(());
        }
    }

    println!("done - processed {total} headlines.");
    Ok(())
}

fn command_calibrate(args: CalibrateArgs) -> Result<()> {
    let enigo = Enigo::new(&Settings::default())
        .map_err(|err| anyhow!("failed to initialise input backend: {err}"))?;

    println!("\n=== landmark calibration ===");

    println!("step 1: the yellow question panel");
    prompt_enter("click it, then press enter here")?;
    let question_panel = pointer_position(&enigo)?;
    println!("  captured panel: {question_panel}");

    println!("\nstep 2: navigate to the FIRST question");
    prompt_enter("ready? press enter")?;

    println!("\nstep 3: the question label / id");
    prompt_enter("click it, then press enter")?;
    let question_label = pointer_position(&enigo)?;
    println!("  captured label: {question_label}");

    println!("\nstep 4: hover over the </> code icon");
    prompt_enter("hover it, then press enter")?;
    let js_icon = pointer_position(&enigo)?;
    println!("  captured icon: {js_icon}");

    println!("\nstep 5: click the code icon");
    prompt_enter("once the editor opens, press enter")?;

    println!("\nstep 6: click inside the code box");
    prompt_enter("click in the text, then press enter")?;
    let js_text_area = pointer_position(&enigo)?;
    println!("  captured code box: {js_text_area}");

    println!("\nstep 7: hover over the save button");
    prompt_enter("hover it, then press enter")?;
    let js_save = pointer_position(&enigo)?;
    println!("  captured save: {js_save}");

    let landmarks = Landmarks {
        question_panel,
        js_icon,
        js_text_area,
        js_save,
        question_label,
    };
    landmarks.save(&args.out)?;

    println!("\nsaved landmark coordinates to {}", args.out.display());
    Ok(())
}

fn command_plan(args: PlanArgs) -> Result<()> {
    let rows = load_rows(&args.file)?;
    let payload = build_plan_payload(&rows, &args);
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

#[derive(Serialize)]
struct PlanPayload {
    generated_at: String,
    input_path: String,
    category: &'static str,
    column: &'static str,
    count: usize,
    headlines: Vec<String>,
}

fn build_plan_payload(rows: &[Row], args: &PlanArgs) -> PlanPayload {
    let mut headlines = select_headlines(rows, args.category, args.recall, args.controlled);
    if args.limit > 0 && headlines.len() > args.limit {
        headlines.truncate(args.limit);
    }
    PlanPayload {
        generated_at: timestamp_iso(),
        input_path: args.file.display().to_string(),
        category: args.category.as_str(),
        column: list_column(args.recall),
        count: headlines.len(),
        headlines,
    }
}

/// Which subset of rows to process. `A,B` and `1,2` rows belong to both
/// categories of their pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Category {
    #[value(name = "A")]
    A,
    #[value(name = "B")]
    B,
    #[value(name = "1")]
    One,
    #[value(name = "2")]
    Two,
}

impl Category {
    fn as_str(self) -> &'static str {
        match self {
            Category::A => "A",
            Category::B => "B",
            Category::One => "1",
            Category::Two => "2",
        }
    }

    fn paired(self) -> &'static str {
        match self {
            Category::A | Category::B => "A,B",
            Category::One | Category::Two => "1,2",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Row = HashMap<String, String>;

fn list_column(recall: bool) -> &'static str {
    if recall {
        COL_RECALL_LIST
    } else {
        COL_PRES_LIST
    }
}

/// Filter rows on the list-membership column and map each match to its
/// display text, keeping file order. A row matches when its cell equals the
/// category exactly or equals the paired value; blank or absent cells never
/// match.
fn select_headlines(
    rows: &[Row],
    category: Category,
    use_recall_column: bool,
    prefer_controlled: bool,
) -> Vec<String> {
    let column = list_column(use_recall_column);
    let exact = category.as_str();
    let paired = category.paired();

    let mut selected = Vec::new();
    for row in rows {
        let Some(cell) = row.get(column) else {
            continue;
        };
        if cell != exact && cell != paired {
            continue;
        }

        let text = match row.get(COL_CONTROLLED) {
            Some(edited) if prefer_controlled && !edited.trim().is_empty() => edited.clone(),
            _ => row.get(COL_HEADLINE).cloned().unwrap_or_default(),
        };
        selected.push(text);
    }
    selected
}

fn load_rows(path: &Path) -> Result<Vec<Row>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read input file: {}", path.display()))?;
    parse_rows(&raw)
}

/// Parse header-plus-rows TSV into column-name maps. Short rows read as
/// empty cells; surplus cells are dropped.
fn parse_rows(raw: &str) -> Result<Vec<Row>> {
    let mut lines = raw
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty());

    let header: Vec<&str> = match lines.next() {
        Some(line) => line.split('\t').collect(),
        None => bail!("input file is empty"),
    };

    let mut rows = Vec::new();
    for line in lines {
        let mut cells = line.split('\t');
        let mut row = Row::with_capacity(header.len());
        for name in &header {
            let cell = cells.next().unwrap_or("");
            row.insert((*name).to_string(), cell.to_string());
        }
        rows.push(row);
    }
    Ok(rows)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Point {
    x: i32,
    y: i32,
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

fn parse_point(raw: &str) -> Result<Point> {
    let (x, y) = raw
        .trim()
        .split_once(',')
        .with_context(|| format!("expected `x,y`, got `{raw}`"))?;
    let x = x
        .trim()
        .parse::<i32>()
        .with_context(|| format!("bad x coordinate in `{raw}`"))?;
    let y = y
        .trim()
        .parse::<i32>()
        .with_context(|| format!("bad y coordinate in `{raw}`"))?;
    Ok(Point { x, y })
}

/// The five fixed screen locations the replay clicks. Captured once by
/// `calibrate` and persisted as one `name: x,y` line each; any change to the
/// screen layout, resolution, or editor version invalidates them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Landmarks {
    question_panel: Point,
    js_icon: Point,
    js_text_area: Point,
    js_save: Point,
    question_label: Point,
}

impl Landmarks {
    fn parse(raw: &str) -> Result<Landmarks> {
        let mut question_panel = None;
        let mut js_icon = None;
        let mut js_text_area = None;
        let mut js_save = None;
        let mut question_label = None;

        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                bail!("malformed landmark line: `{line}`");
            };
            let point =
                parse_point(value).with_context(|| format!("malformed landmark line: `{line}`"))?;
            match name.trim() {
                "question_panel" => question_panel = Some(point),
                "js_icon" => js_icon = Some(point),
                "js_text_area" => js_text_area = Some(point),
                "js_save" => js_save = Some(point),
                "question_label" => question_label = Some(point),
                other => bail!("unknown landmark name: `{other}`"),
            }
        }

        let missing = |name: &'static str| move || anyhow!("landmark file is missing `{name}`");
        Ok(Landmarks {
            question_panel: question_panel.ok_or_else(missing("question_panel"))?,
            js_icon: js_icon.ok_or_else(missing("js_icon"))?,
            js_text_area: js_text_area.ok_or_else(missing("js_text_area"))?,
            js_save: js_save.ok_or_else(missing("js_save"))?,
            question_label: question_label.ok_or_else(missing("question_label"))?,
        })
    }

    fn render(&self) -> String {
        format!(
            "question_panel: {}\njs_icon: {}\njs_text_area: {}\njs_save: {}\nquestion_label: {}\n",
            self.question_panel, self.js_icon, self.js_text_area, self.js_save, self.question_label
        )
    }

    fn load(path: &Path) -> Result<Landmarks> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read landmark file: {}", path.display()))?;
        Landmarks::parse(&raw).with_context(|| format!("invalid landmark file: {}", path.display()))
    }

    fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())
            .with_context(|| format!("failed to write landmark file: {}", path.display()))
    }
}

/// Synthesizes clicks, keystrokes, and clipboard pastes against the live
/// screen. Every action is fire-and-forget; the fixed sleep after each step
/// is the only synchronization with the driven application, so the pacing
/// stays even where it looks redundant.
struct ReplayDriver {
    enigo: Enigo,
    clipboard: Clipboard,
    delay: Duration,
}

impl ReplayDriver {
    fn new(delay_secs: f64) -> Result<ReplayDriver> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|err| anyhow!("failed to initialise input backend: {err}"))?;
        let clipboard =
            Clipboard::new().map_err(|err| anyhow!("failed to open system clipboard: {err}"))?;
        let delay = Duration::try_from_secs_f64(delay_secs)
            .map_err(|err| anyhow!("invalid step delay `{delay_secs}`: {err}"))?;
        Ok(ReplayDriver {
            enigo,
            clipboard,
            delay,
        })
    }

    /// Each pause reports whether the run is still live; an operator Ctrl-C
    /// lands mid-sleep and abandons the rest of the sequence.
    fn pause(&self) -> bool {
        sleep_unless_interrupted(self.delay)
    }

    fn half_pause(&self) -> bool {
        sleep_unless_interrupted(self.delay / 2)
    }

    fn double_pause(&self) -> bool {
        sleep_unless_interrupted(self.delay * 2)
    }

    fn set_clipboard(&mut self, text: &str) -> Result<()> {
        self.clipboard
            .set_text(text.to_string())
            .map_err(|err| anyhow!("failed to set clipboard text: {err}"))
    }

    fn click(&mut self, point: Point) -> Result<()> {
        self.enigo
            .move_mouse(point.x, point.y, Coordinate::Abs)
            .map_err(|err| anyhow!("failed to move pointer to {point}: {err}"))?;
        self.enigo
            .button(Button::Left, Direction::Click)
            .map_err(|err| anyhow!("failed to click at {point}: {err}"))
    }

    fn tap(&mut self, key: Key) -> Result<()> {
        self.enigo
            .key(key, Direction::Click)
            .map_err(|err| anyhow!("failed to press key: {err}"))
    }

    /// Hold `modifier` around a single key press (shift+tab and friends).
    fn tap_with(&mut self, modifier: Key, key: Key) -> Result<()> {
        self.enigo
            .key(modifier, Direction::Press)
            .map_err(|err| anyhow!("failed to press modifier: {err}"))?;
        let tapped = self.tap(key);
        let released = self
            .enigo
            .key(modifier, Direction::Release)
            .map_err(|err| anyhow!("failed to release modifier: {err}"));
        tapped.and(released)
    }

    /// Primary-modifier shortcut: Cmd on macOS, Ctrl elsewhere.
    fn shortcut(&mut self, letter: char) -> Result<()> {
        self.tap_with(primary_modifier(), Key::Unicode(letter))
    }

    fn select_all(&mut self) -> Result<()> {
        self.shortcut('a')
    }

    fn paste(&mut self) -> Result<()> {
        self.shortcut('v')
    }

    /// Clear the focused field and paste `text` into it. Returns false when
    /// the operator interrupted mid-sequence.
    fn replace_field_text(&mut self, text: &str) -> Result<bool> {
        self.set_clipboard(text)?;
        if !self.pause() {
            return Ok(false);
        }
        self.select_all()?;
        if !self.pause() {
            return Ok(false);
        }
        self.tap(Key::Delete)?;
        self.paste()?;
        Ok(self.pause())
    }

    /// Basic-variant paste: paste shortcut then a Right-arrow to unselect.
    fn paste_and_step(&mut self) -> Result<()> {
        self.paste()?;
        self.tap(Key::RightArrow)
    }

    /// Append the recall probe two lines below the current cursor.
    fn append_probe(&mut self) -> Result<()> {
        self.tap(Key::Return)?;
        self.tap(Key::Return)?;
        self.set_clipboard(RECALL_PROBE)?;
        self.paste_and_step()
    }

    /// Open the code editor for the current question, swap in the template,
    /// save, and walk back down the question list into question `idx + 1`.
    fn inject_question_code(
        &mut self,
        landmarks: &Landmarks,
        idx: usize,
        recall: bool,
        tabs: usize,
    ) -> Result<bool> {
        self.click(landmarks.js_icon)?;
        if !self.double_pause() {
            return Ok(false);
        }

        self.click(landmarks.js_text_area)?;
        if !self.pause() {
            return Ok(false);
        }
        self.select_all()?;
        if !self.pause() {
            return Ok(false);
        }

        self.tap(Key::Delete)?;
        if !self.pause() {
            return Ok(false);
        }
        let template = if recall {
            RECALL_TIMER_JS
        } else {
            PRESENTATION_HOOK_JS
        };
        self.set_clipboard(template)?;
        self.paste()?;
        if !self.pause() {
            return Ok(false);
        }

        // The save round-trip is the slowest UI step.
        self.click(landmarks.js_save)?;
        if !self.double_pause() {
            return Ok(false);
        }

        self.click(landmarks.question_label)?;
        if !self.pause() {
            return Ok(false);
        }

        for _ in 0..(idx + 1) {
            self.tap(Key::DownArrow)?;
            if !self.half_pause() {
                return Ok(false);
            }
        }

        self.tap(Key::Return)?;
        if !self.double_pause() {
            return Ok(false);
        }

        for _ in 0..tabs {
            self.tap(Key::Tab)?;
            if !self.half_pause() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Key-only navigation from the headline field into the next question's
    /// headline field (full variant).
    fn advance_to_next(&mut self, tabs: usize) -> Result<bool> {
        self.tap(Key::RightArrow)?;
        if !self.half_pause() {
            return Ok(false);
        }
        self.tap(Key::Tab)?;
        if !self.half_pause() {
            return Ok(false);
        }
        self.tap(Key::Escape)?;
        if !self.pause() {
            return Ok(false);
        }
        self.tap(Key::DownArrow)?;
        if !self.half_pause() {
            return Ok(false);
        }
        self.tap(Key::Return)?;
        if !self.pause() {
            return Ok(false);
        }

        for _ in 0..tabs {
            self.tap(Key::Tab)?;
            if !self.half_pause() {
                return Ok(false);
            }
        }

        Ok(self.pause())
    }

    /// The basic variant's navigation sequence. Materially different from
    /// `advance_to_next` (extra shift+tab, even pacing); both are kept as
    /// recorded.
    fn advance_basic(&mut self, tabs: usize) -> Result<bool> {
        self.tap(Key::RightArrow)?;
        if !self.pause() {
            return Ok(false);
        }
        self.tap(Key::Tab)?;
        if !self.pause() {
            return Ok(false);
        }
        self.tap_with(Key::Shift, Key::Tab)?;
        if !self.pause() {
            return Ok(false);
        }
        self.tap(Key::Escape)?;
        if !self.pause() {
            return Ok(false);
        }
        self.tap(Key::DownArrow)?;
        if !self.pause() {
            return Ok(false);
        }
        self.tap(Key::Return)?;

        for _ in 0..tabs {
            if !self.pause() {
                return Ok(false);
            }
            self.tap(Key::Tab)?;
        }
        Ok(true)
    }
}

fn primary_modifier() -> Key {
    if cfg!(target_os = "macos") {
        Key::Meta
    } else {
        Key::Control
    }
}

fn pointer_position(enigo: &Enigo) -> Result<Point> {
    let (x, y) = enigo
        .location()
        .map_err(|err| anyhow!("failed to read pointer position: {err}"))?;
    Ok(Point { x, y })
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

const INTERRUPT_POLL: Duration = Duration::from_millis(50);

fn arm_interrupt_handler() -> Result<()> {
    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst))
        .context("failed to install interrupt handler")
}

fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Sleep in short slices so an operator Ctrl-C is observed within one poll
/// interval instead of after the full pause. Returns false once interrupted.
fn sleep_unless_interrupted(total: Duration) -> bool {
    let mut left = total;
    while !left.is_zero() {
        if interrupted() {
            return false;
        }
        let step = left.min(INTERRUPT_POLL);
        thread::sleep(step);
        left -= step;
    }
    !interrupted()
}

fn prompt_enter(message: &str) -> Result<()> {
    Input::<String>::new()
        .with_prompt(message)
        .allow_empty(true)
        .interact_text()
        .context("prompt failed")?;
    Ok(())
}

fn confirm(message: &str) -> Result<bool> {
    Confirm::new()
        .with_prompt(message)
        .default(true)
        .interact()
        .context("prompt failed")
}

fn countdown() -> bool {
    println!("starting in 3...");
    if !sleep_unless_interrupted(Duration::from_secs(1)) {
        return false;
    }
    println!("2...");
    if !sleep_unless_interrupted(Duration::from_secs(1)) {
        return false;
    }
    println!("1...");
    sleep_unless_interrupted(Duration::from_secs(1))
}

const MAX_DELAY_SECS: f64 = 60.0;

/// Validate `--delay` at parse time so an absurd value surfaces as a CLI
/// error rather than a panic when building the step Duration.
fn parse_delay(raw: &str) -> Result<f64, String> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| format!("`{raw}` is not a number of seconds"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("delay must be a non-negative number, got `{raw}`"));
    }
    if secs > MAX_DELAY_SECS {
        return Err(format!("delay must be at most {MAX_DELAY_SECS} seconds"));
    }
    Ok(secs)
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}

fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect::<String>() + "..."
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample_rows() -> Vec<Row> {
        vec![
            row(&[(COL_PRES_LIST, "A"), (COL_HEADLINE, "H1")]),
            row(&[(COL_PRES_LIST, "A,B"), (COL_HEADLINE, "H2")]),
            row(&[(COL_PRES_LIST, "C"), (COL_HEADLINE, "H3")]),
        ]
    }

    #[test]
    fn selects_exact_and_paired_rows_in_order() {
        let selected = select_headlines(&sample_rows(), Category::A, false, false);
        assert_eq!(selected, vec!["H1", "H2"]);
    }

    #[test]
    fn paired_row_matches_both_categories() {
        let selected = select_headlines(&sample_rows(), Category::B, false, false);
        assert_eq!(selected, vec!["H2"]);
    }

    #[test]
    fn numeric_categories_use_their_own_pair() {
        let rows = vec![
            row(&[(COL_PRES_LIST, "1"), (COL_HEADLINE, "N1")]),
            row(&[(COL_PRES_LIST, "1,2"), (COL_HEADLINE, "N2")]),
            row(&[(COL_PRES_LIST, "A,B"), (COL_HEADLINE, "N3")]),
        ];
        let selected = select_headlines(&rows, Category::Two, false, false);
        assert_eq!(selected, vec!["N2"]);
    }

    #[test]
    fn blank_or_missing_cell_never_matches() {
        let rows = vec![
            row(&[(COL_PRES_LIST, ""), (COL_HEADLINE, "H1")]),
            row(&[(COL_HEADLINE, "H2")]),
        ];
        let selected = select_headlines(&rows, Category::A, false, false);
        assert!(selected.is_empty());
    }

    #[test]
    fn recall_flag_switches_the_filter_column() {
        let rows = vec![
            row(&[
                (COL_PRES_LIST, "A"),
                (COL_RECALL_LIST, "B"),
                (COL_HEADLINE, "H1"),
            ]),
            row(&[
                (COL_PRES_LIST, "B"),
                (COL_RECALL_LIST, "A"),
                (COL_HEADLINE, "H2"),
            ]),
        ];
        let selected = select_headlines(&rows, Category::A, true, false);
        assert_eq!(selected, vec!["H2"]);
    }

    #[test]
    fn controlled_text_replaces_headline_when_present() {
        let rows = vec![
            row(&[
                (COL_PRES_LIST, "A"),
                (COL_HEADLINE, "raw"),
                (COL_CONTROLLED, "edited"),
            ]),
            row(&[
                (COL_PRES_LIST, "A"),
                (COL_HEADLINE, "raw2"),
                (COL_CONTROLLED, "  "),
            ]),
        ];
        let selected = select_headlines(&rows, Category::A, false, true);
        assert_eq!(selected, vec!["edited", "raw2"]);
    }

    #[test]
    fn controlled_text_is_ignored_without_the_preference() {
        let rows = vec![row(&[
            (COL_PRES_LIST, "A"),
            (COL_HEADLINE, "raw"),
            (COL_CONTROLLED, "edited"),
        ])];
        let selected = select_headlines(&rows, Category::A, false, false);
        assert_eq!(selected, vec!["raw"]);
    }

    #[test]
    fn limit_truncates_without_reordering() {
        let rows = vec![
            row(&[(COL_PRES_LIST, "A"), (COL_HEADLINE, "H1")]),
            row(&[(COL_PRES_LIST, "A"), (COL_HEADLINE, "H2")]),
            row(&[(COL_PRES_LIST, "A"), (COL_HEADLINE, "H3")]),
        ];
        let mut selected = select_headlines(&rows, Category::A, false, false);
        selected.truncate(2);
        assert_eq!(selected, vec!["H1", "H2"]);
    }

    #[test]
    fn category_paired_values() {
        assert_eq!(Category::A.paired(), "A,B");
        assert_eq!(Category::B.paired(), "A,B");
        assert_eq!(Category::One.paired(), "1,2");
        assert_eq!(Category::Two.paired(), "1,2");
    }

    #[test]
    fn parse_rows_maps_header_to_cells() {
        let raw = "Pres List\tHeadline\nA\tfirst\nB\tsecond\n";
        let rows = parse_rows(raw).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][COL_PRES_LIST], "A");
        assert_eq!(rows[1][COL_HEADLINE], "second");
    }

    #[test]
    fn parse_rows_pads_short_rows_and_drops_surplus_cells() {
        let raw = "Pres List\tHeadline\nA\nB\tsecond\textra\n";
        let rows = parse_rows(raw).unwrap();
        assert_eq!(rows[0][COL_HEADLINE], "");
        assert_eq!(rows[1][COL_HEADLINE], "second");
        assert_eq!(rows[1].len(), 2);
    }

    #[test]
    fn parse_rows_skips_blank_lines_and_crlf() {
        let raw = "Pres List\tHeadline\r\n\r\nA\tfirst\r\n";
        let rows = parse_rows(raw).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][COL_HEADLINE], "first");
    }

    #[test]
    fn parse_rows_rejects_empty_input() {
        assert!(parse_rows("").is_err());
    }

    #[test]
    fn landmark_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coords.txt");
        let landmarks = Landmarks {
            question_panel: Point { x: 100, y: 200 },
            js_icon: Point { x: 300, y: 400 },
            js_text_area: Point { x: 500, y: 600 },
            js_save: Point { x: 700, y: 800 },
            question_label: Point { x: 900, y: 1000 },
        };
        landmarks.save(&path).unwrap();
        let loaded = Landmarks::load(&path).unwrap();
        assert_eq!(loaded, landmarks);
    }

    #[test]
    fn landmark_parse_accepts_any_line_order() {
        let raw = "question_label: 9,10\nquestion_panel: 1,2\njs_save: 7,8\njs_icon: 3,4\njs_text_area: 5,6\n";
        let landmarks = Landmarks::parse(raw).unwrap();
        assert_eq!(landmarks.question_panel, Point { x: 1, y: 2 });
        assert_eq!(landmarks.question_label, Point { x: 9, y: 10 });
    }

    #[test]
    fn landmark_parse_rejects_missing_entry() {
        let raw = "question_panel: 1,2\njs_icon: 3,4\njs_text_area: 5,6\njs_save: 7,8\n";
        let err = Landmarks::parse(raw).unwrap_err();
        assert!(err.to_string().contains("question_label"));
    }

    #[test]
    fn landmark_parse_rejects_malformed_lines() {
        assert!(Landmarks::parse("js_icon: 3;4\n").is_err());
        assert!(Landmarks::parse("js_icon 3,4\n").is_err());
        assert!(Landmarks::parse("mystery: 3,4\n").is_err());
    }

    #[test]
    fn parse_point_trims_whitespace() {
        assert_eq!(parse_point(" 12 , 34 ").unwrap(), Point { x: 12, y: 34 });
        assert!(parse_point("12").is_err());
        assert!(parse_point("x,34").is_err());
    }

    #[test]
    fn plan_payload_reports_column_and_selection() {
        let args = PlanArgs {
            category: Category::A,
            recall: false,
            controlled: false,
            file: PathBuf::from("data.txt"),
            limit: 1,
        };
        let payload = build_plan_payload(&sample_rows(), &args);
        assert_eq!(payload.column, COL_PRES_LIST);
        assert_eq!(payload.category, "A");
        assert_eq!(payload.count, 1);
        assert_eq!(payload.headlines, vec!["H1"]);
    }

    #[test]
    fn sleep_observes_the_interrupt_flag() {
        INTERRUPTED.store(false, Ordering::SeqCst);
        assert!(sleep_unless_interrupted(Duration::from_millis(10)));

        INTERRUPTED.store(true, Ordering::SeqCst);
        let started = std::time::Instant::now();
        assert!(!sleep_unless_interrupted(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!sleep_unless_interrupted(Duration::ZERO));
        INTERRUPTED.store(false, Ordering::SeqCst);
    }

    #[test]
    fn delay_flag_rejects_out_of_range_values() {
        assert_eq!(parse_delay("0.5"), Ok(0.5));
        assert_eq!(parse_delay("0"), Ok(0.0));
        assert!(parse_delay("-1").is_err());
        assert!(parse_delay("1e30").is_err());
        assert!(parse_delay("NaN").is_err());
        assert!(parse_delay("fast").is_err());
    }

    #[test]
    fn truncate_text_keeps_short_strings() {
        assert_eq!(truncate_text("short", 30), "short");
        assert_eq!(truncate_text("abcdef", 3), "abc...");
    }

    #[test]
    fn injection_templates_differ_by_mode() {
        assert!(PRESENTATION_HOOK_JS.contains("autoAdvanceController"));
        assert!(RECALL_TIMER_JS.contains("Time remaining: 60 seconds"));
        assert!(!PRESENTATION_HOOK_JS.contains("timer-display"));
    }
}
