
use assert_cmd::prelude::*;
use cli_helpers::*;
use predicates::prelude::*;
use rust_decimal_macros::dec;
use tempfile::TempDir;

fn setup_temp_home() -> TempDir {
    TempDir::new().expect("failed to create temp home")
}

#[test]
fn portfolio_list_empty_db_no_color_when_piped() {
    let home = setup_temp_home();

    base_cmd(&home)
        .args(["portfolio", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No portfolios yet"))
        .stdout(predicate::str::contains("\u{001b}[").not());
}

#[test]
fn commands_need_a_portfolio() {
    let home = setup_temp_home();

    base_cmd(&home)
        .args(["portfolio", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No portfolios yet"));
}

#[test]
fn buy_then_split_shows_scaled_holding() {
    let home = setup_temp_home();
    create_portfolio(&home, "Main", "FIFO").unwrap();
    add_trade(&home, "buy", "aapl", "100", "180", "2023-01-10").unwrap();

    let split = run_cmd_json(
        &home,
        &["tx", "add", "split", "AAPL", "--ratio", "4", "--date", "2023-08-01"],
    )
    .unwrap();
    assert_eq!(split["kind"], "SPLIT");
    assert_eq!(dec_field(&split, "quantity"), dec!(300));

    let holdings = holdings_json(&home).unwrap();
    let aapl = holding(&holdings, "AAPL").expect("AAPL holding");
    assert_eq!(dec_field(aapl, "quantity"), dec!(400));
    assert_eq!(dec_field(aapl, "cost_basis"), dec!(18000));
    assert_eq!(dec_field(aapl, "avg_cost"), dec!(45));

    base_cmd(&home)
        .args(["portfolio", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("AAPL"))
        .stdout(predicate::str::contains("18,000.00 USD"));
}

#[test]
fn overselling_fails_with_shortfall() {
    let home = setup_temp_home();
    create_portfolio(&home, "Main", "FIFO").unwrap();
    add_trade(&home, "buy", "MSFT", "10", "100", "2024-01-02").unwrap();

    base_cmd(&home)
        .args(["tx", "add", "sell", "MSFT", "11", "--price", "120", "--date", "2024-02-01"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("insufficient shares of MSFT"));

    let holdings = holdings_json(&home).unwrap();
    assert_eq!(dec_field(&holdings[0], "quantity"), dec!(10));
}

#[test]
fn tax_report_for_long_term_sale() {
    let home = setup_temp_home();
    create_portfolio(&home, "Main", "FIFO").unwrap();
    add_trade(&home, "buy", "AAPL", "50", "150", "2022-05-01").unwrap();
    add_trade(&home, "sell", "AAPL", "50", "200", "2024-06-01").unwrap();

    let report = run_cmd_json(&home, &["tax", "2024"]).unwrap();
    assert_eq!(report["entries"].as_array().unwrap().len(), 1);
    assert_eq!(dec_field(&report, "total_long_term"), dec!(2500));
    assert_eq!(dec_field(&report, "total_short_term"), dec!(0));

    base_cmd(&home)
        .args(["tax", "2024"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Long"))
        .stdout(predicate::str::contains("2,500.00 USD"));
}

#[test]
fn several_portfolios_need_a_selection() {
    let home = setup_temp_home();
    create_portfolio(&home, "Taxable", "FIFO").unwrap();
    create_portfolio(&home, "Retirement", "LIFO").unwrap();

    base_cmd(&home)
        .args(["portfolio", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--portfolio"));

    run_cmd(
        &home,
        &["-p", "Retirement", "tx", "add", "buy", "VTI", "5", "--price", "200", "--date", "2024-01-02"],
    )
    .unwrap();
    let retirement = run_cmd_json(&home, &["--portfolio", "Retirement", "portfolio", "show"]).unwrap();
    assert_eq!(retirement.as_array().unwrap().len(), 1);
    let taxable = run_cmd_json(&home, &["--portfolio", "Taxable", "portfolio", "show"]).unwrap();
    assert!(taxable.as_array().unwrap().is_empty());
}

#[test]
fn import_dry_run_then_import_and_undo() {
    let home = setup_temp_home();
    create_portfolio(&home, "Main", "FIFO").unwrap();
    let csv = home.path().join("trades.csv");
    std::fs::write(
        &csv,
        "date,symbol,type,quantity,price,commission\n\
         2024-01-02,AAPL,buy,10,100,0\n\
         2024-02-01,AAPL,sell,4,120,0\n",
    )
    .unwrap();
    let csv = csv.to_str().unwrap();

    base_cmd(&home)
        .args(["import", csv, "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run"));
    assert!(holdings_json(&home).unwrap().is_empty());

    let report = run_cmd_json(&home, &["import", csv]).unwrap();
    assert_eq!(report["imported"], 2);
    let batch = report["batch_id"].as_str().unwrap().to_string();
    assert_eq!(dec_field(&holdings_json(&home).unwrap()[0], "quantity"), dec!(6));

    let again = run_cmd_json(&home, &["import", csv]).unwrap();
    assert_eq!(again["imported"], 0);
    assert_eq!(again["duplicates"].as_array().unwrap().len(), 2);

    let undo = run_cmd_json(&home, &["import-undo", &batch]).unwrap();
    assert_eq!(undo["removed"], 2);
    assert!(holdings_json(&home).unwrap().is_empty());
}

#[test]
fn snapshot_and_performance_with_manual_prices() {
    let home = setup_temp_home();
    create_portfolio(&home, "Main", "FIFO").unwrap();
    add_trade(&home, "buy", "VTI", "10", "200", "2024-01-02").unwrap();

    let first = run_cmd_json(
        &home,
        &["snapshot", "--price", "VTI=200", "--date", "2024-01-02"],
    )
    .unwrap();
    assert_eq!(dec_field(&first, "total_value"), dec!(2000));
    run_cmd_json(
        &home,
        &["snapshot", "--price", "vti=220", "--date", "2024-02-01"],
    )
    .unwrap();

    let perf = run_cmd_json(
        &home,
        &["performance", "--from", "2024-01-02", "--to", "2024-02-01"],
    )
    .unwrap();
    assert_eq!(dec_field(&perf, "market_value"), dec!(2200));
    assert_eq!(dec_field(&perf, "twr"), dec!(0.1));
    assert!(perf.get("benchmark").is_none());
}

#[test]
fn corporate_action_announce_distribute_apply() {
    let home = setup_temp_home();
    create_portfolio(&home, "Main", "FIFO").unwrap();
    add_trade(&home, "buy", "KO", "100", "50", "2024-01-02").unwrap();

    let announced = run_cmd_json(
        &home,
        &["actions", "announce", "dividend", "KO", "--date", "2024-03-01", "--amount", "0.485"],
    )
    .unwrap();
    let id = announced["id"].as_str().unwrap().to_string();

    let unapplied = run_cmd_json(&home, &["actions", "unapplied"]).unwrap();
    assert_eq!(unapplied.as_array().unwrap().len(), 1);

    let queued = run_cmd_json(&home, &["actions", "distribute", &id]).unwrap();
    assert_eq!(queued.as_array().unwrap().len(), 1);
    assert_eq!(queued[0]["status"], "PENDING");

    let applied = run_cmd_json(&home, &["actions", "apply"]).unwrap();
    assert_eq!(applied[0]["status"], "APPLIED");

    let transactions = run_cmd_json(&home, &["tx", "list", "--symbol", "ko"]).unwrap();
    let dividend = transactions
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["kind"] == "DIVIDEND")
        .expect("dividend recorded");
    assert_eq!(dec_field(dividend, "cash_amount"), dec!(48.5));
}
