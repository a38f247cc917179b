mod args_test;
