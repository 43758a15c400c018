//! Contract tests for the CLI surface: required flags, defaults and
//! subcommand wiring.

use pgback::cli::{clap_command, parse_args, Command};

fn parse(args: &[&str]) -> Command {
    parse_args(args.iter().map(|s| s.to_string())).unwrap().command
}

#[test]
fn backup_path_is_required() {
    let result = clap_command().try_get_matches_from(["pgback", "backup", "-D", "/data"]);
    assert!(result.is_err());
    let result = clap_command().try_get_matches_from(["pgback", "restore"]);
    assert!(result.is_err());
}

#[test]
fn unknown_subcommand_is_rejected() {
    let result = clap_command().try_get_matches_from(["pgback", "verify", "-b", "/bk"]);
    assert!(result.is_err());
}

#[test]
fn backup_defaults_match_contract() {
    let Command::Backup(args) = parse(&["pgback", "backup", "-b", "/bk"]) else {
        panic!("expected backup command");
    };
    assert_eq!(args.common.pgdata.display().to_string(), "/var/lib/pgsql/data");
    assert_eq!(args.common.backup_path, "/bk");
    assert_eq!(args.common.compress, "none");
    assert_eq!(args.common.tmpdir.display().to_string(), "/tmp/barman");
    assert_eq!(args.common.retries, 5);
    assert_eq!(args.common.pause, 30);
    assert_eq!(args.common.parallel, 1);
    assert_eq!(args.common.block_size, 8192);
    assert_eq!(args.common.magic, 2359285);
    assert_eq!(args.common.rsync_args, " -v");
    assert_eq!(args.common.verbose, 0);
    assert_eq!(
        args.exclude,
        "*pg_xlog/*,*pg_log/*,*pg_stat_tmp/*,*pg_replslot/*"
    );
    assert!(args.lsn.is_none());
    assert!(args.after.is_none());
    assert!(args.file_list.is_none());
}

#[test]
fn backup_flags_parse_into_typed_fields() {
    let Command::Backup(args) = parse(&[
        "pgback", "backup", "-b", "host:/bk", "-l", "16/B374D848", "-a", "1700000000",
        "-c", "bzip2-9", "-p", "8", "-Z", "16384", "-w", "4096", "-vv",
    ]) else {
        panic!("expected backup command");
    };
    assert_eq!(args.lsn.as_deref(), Some("16/B374D848"));
    assert_eq!(args.after, Some(1700000000));
    assert_eq!(args.common.compress, "bzip2-9");
    assert_eq!(args.common.parallel, 8);
    assert_eq!(args.common.block_size, 16384);
    assert_eq!(args.common.bandwidth_limit, Some(4096));
    assert_eq!(args.common.verbose, 2);
}

#[test]
fn restore_parses_common_flags() {
    let Command::Restore(args) = parse(&[
        "pgback", "restore", "-D", "/data", "-b", "/bk", "-T", "ts1:/mnt/ts1",
    ]) else {
        panic!("expected restore command");
    };
    assert_eq!(args.common.pgdata.display().to_string(), "/data");
    assert_eq!(args.common.tablespaces, "ts1:/mnt/ts1");
}

#[test]
fn missing_action_is_fatal() {
    assert!(matches!(parse(&["pgback"]), Command::None));
    assert!(pgback::run(["pgback"]).is_err());
}
